//! Parsed form of a stored recurrence rule expression.
//!
//! Only rules bounded by an explicit `UNTIL` instant are accepted. `COUNT`
//! termination and open-ended rules are rejected here, before any storage
//! I/O happens.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Secondly,
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl FromStr for Frequency {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SECONDLY" => Ok(Frequency::Secondly),
            "MINUTELY" => Ok(Frequency::Minutely),
            "HOURLY" => Ok(Frequency::Hourly),
            "DAILY" => Ok(Frequency::Daily),
            "WEEKLY" => Ok(Frequency::Weekly),
            "MONTHLY" => Ok(Frequency::Monthly),
            "YEARLY" => Ok(Frequency::Yearly),
            other => Err(EngineError::InvalidRule(format!(
                "unsupported FREQ '{}'",
                other
            ))),
        }
    }
}

/// A validated recurrence rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    pub until: DateTime<Utc>,
    pub by_month_day: Vec<i8>,
    pub by_month: Vec<u8>,
    /// Every `KEY=VALUE` part except `UNTIL`, keys upper-cased, in source order.
    parts: Vec<(String, String)>,
}

impl RecurrenceRule {
    /// Parse and validate rule text such as `FREQ=DAILY;UNTIL=20250504T090000Z`.
    ///
    /// # Errors
    /// Returns `EngineError::InvalidRule` if the text is empty, lacks `FREQ`
    /// or `UNTIL`, uses `COUNT`, or carries out-of-range values.
    pub fn parse(text: &str) -> Result<Self> {
        let body = text.trim();
        let body = body
            .strip_prefix("RRULE:")
            .or_else(|| body.strip_prefix("rrule:"))
            .unwrap_or(body);
        if body.is_empty() {
            return Err(EngineError::InvalidRule("empty RRULE string".to_string()));
        }

        let mut frequency = None;
        let mut interval = 1;
        let mut until = None;
        let mut by_month_day = Vec::new();
        let mut by_month = Vec::new();
        let mut parts = Vec::new();

        for part in body.split(';').filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                EngineError::InvalidRule(format!("malformed rule part '{}'", part))
            })?;
            let key = key.trim().to_ascii_uppercase();
            let value = value.trim().to_string();

            match key.as_str() {
                "FREQ" => frequency = Some(value.to_ascii_uppercase().parse::<Frequency>()?),
                "COUNT" => {
                    return Err(EngineError::InvalidRule(
                        "COUNT-bounded rules are not supported; use UNTIL".to_string(),
                    ))
                }
                "UNTIL" => {
                    until = Some(parse_until(&value)?);
                    continue;
                }
                "INTERVAL" => {
                    interval = value
                        .parse::<u32>()
                        .ok()
                        .filter(|i| *i >= 1)
                        .ok_or_else(|| {
                            EngineError::InvalidRule(format!("invalid INTERVAL '{}'", value))
                        })?;
                }
                "BYMONTHDAY" => by_month_day = parse_list(&value, "BYMONTHDAY", |d: i8| {
                    d != 0 && (-31..=31).contains(&d)
                })?,
                "BYMONTH" => by_month = parse_list(&value, "BYMONTH", |m: u8| (1..=12).contains(&m))?,
                _ => {}
            }
            parts.push((key, value));
        }

        let frequency = frequency
            .ok_or_else(|| EngineError::InvalidRule("missing FREQ".to_string()))?;
        let until = until.ok_or_else(|| {
            EngineError::InvalidRule("open-ended rule: an explicit UNTIL is required".to_string())
        })?;

        Ok(Self {
            frequency,
            interval,
            until,
            by_month_day,
            by_month,
            parts,
        })
    }

    /// Whether the rule contains a part with the given (upper-case) key.
    pub fn has_part(&self, key: &str) -> bool {
        self.parts.iter().any(|(k, _)| k == key)
    }

    /// Keys of every part other than `UNTIL`.
    pub fn part_keys(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|(k, _)| k.as_str())
    }

    /// Rule text without the `UNTIL` bound, for handing to a rule evaluator
    /// that is bounded by an explicit window instead.
    pub fn unbounded_text(&self) -> String {
        self.parts
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl FromStr for RecurrenceRule {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};UNTIL={}",
            self.unbounded_text(),
            self.until.format("%Y%m%dT%H%M%SZ")
        )
    }
}

/// Accepts `20250504T090000Z` and `2025-05-04T09:00:00Z`. Floating and
/// date-only values are not explicit instants.
fn parse_until(value: &str) -> Result<DateTime<Utc>> {
    let compact = value.replace(['-', ':'], "");
    let naive = compact
        .strip_suffix('Z')
        .and_then(|v| NaiveDateTime::parse_from_str(v, "%Y%m%dT%H%M%S").ok())
        .ok_or_else(|| {
            EngineError::InvalidRule(format!(
                "UNTIL '{}' must be a UTC date-time ending in 'Z'",
                value
            ))
        })?;
    Ok(naive.and_utc())
}

fn parse_list<T: FromStr + Copy>(
    value: &str,
    key: &str,
    valid: impl Fn(T) -> bool,
) -> Result<Vec<T>> {
    value
        .split(',')
        .map(|item| {
            item.trim()
                .parse::<T>()
                .ok()
                .filter(|v| valid(*v))
                .ok_or_else(|| EngineError::InvalidRule(format!("invalid {} value '{}'", key, item)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn extended_until_form_is_accepted() {
        let rule = RecurrenceRule::parse("FREQ=DAILY;UNTIL=2025-05-04T09:00:00Z").unwrap();
        assert_eq!(rule.until, Utc.with_ymd_and_hms(2025, 5, 4, 9, 0, 0).unwrap());
        assert_eq!(rule.unbounded_text(), "FREQ=DAILY");
    }

    #[test]
    fn display_reattaches_until() {
        let rule = RecurrenceRule::parse("RRULE:FREQ=WEEKLY;BYDAY=MO;UNTIL=20250504T090000Z").unwrap();
        assert_eq!(rule.to_string(), "FREQ=WEEKLY;BYDAY=MO;UNTIL=20250504T090000Z");
    }

    #[test]
    fn negative_month_days_parse() {
        let rule = RecurrenceRule::parse("FREQ=MONTHLY;BYMONTHDAY=-1,15;UNTIL=20251231T000000Z").unwrap();
        assert_eq!(rule.by_month_day, vec![-1, 15]);
    }
}
