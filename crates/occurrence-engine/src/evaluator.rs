//! RFC 5545 rule expansion over civil time.
//!
//! Wraps the `rrule` crate (v0.13). Rules are expanded on a UTC-anchored copy
//! of the civil time line: the wall-clock DTSTART is handed to `rrule` as if it
//! were UTC, so no DST arithmetic happens inside the evaluator and every
//! candidate comes back as a plain wall-clock value. Mapping those back to real
//! instants is the job of [`crate::civil`].

use std::collections::VecDeque;

use chrono::{Duration, NaiveDateTime, Utc};
use rrule::{RRuleError, RRuleSet, RRuleSetIter};

use crate::error::{EngineError, Result};
use crate::rule::{Frequency, RecurrenceRule};

/// Lazily produced, ascending wall-clock candidates.
pub type CivilTimes = Box<dyn Iterator<Item = Result<NaiveDateTime>> + Send>;

/// External rule-expansion boundary.
pub trait RuleEvaluator: Send + Sync {
    /// Check that the evaluator can expand `rule` anchored at `dtstart`.
    fn validate(&self, rule: &RecurrenceRule, dtstart: NaiveDateTime) -> Result<()>;

    /// Candidates of `rule` anchored at `dtstart` within
    /// `[window_start, window_end]`, in ascending order.
    fn expand(
        &self,
        rule: &RecurrenceRule,
        dtstart: NaiveDateTime,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> Result<CivilTimes>;
}

/// [`RuleEvaluator`] backed by the `rrule` crate.
#[derive(Debug, Clone)]
pub struct RRuleEvaluator {
    batch_size: u16,
}

impl Default for RRuleEvaluator {
    fn default() -> Self {
        Self::new(256)
    }
}

impl RRuleEvaluator {
    /// Up to `batch_size` candidates are buffered per refill. Values below 2
    /// are raised to 2.
    pub fn new(batch_size: u16) -> Self {
        Self {
            batch_size: batch_size.max(2),
        }
    }
}

fn ical(civil: NaiveDateTime) -> String {
    civil.format("%Y%m%dT%H%M%SZ").to_string()
}

fn parse_set(
    rule_body: &str,
    dtstart: NaiveDateTime,
    until: NaiveDateTime,
) -> std::result::Result<RRuleSet, RRuleError> {
    let text = format!(
        "DTSTART:{}\nRRULE:{};UNTIL={}",
        ical(dtstart),
        rule_body,
        ical(until)
    );
    text.parse::<RRuleSet>()
}

impl RuleEvaluator for RRuleEvaluator {
    fn validate(&self, rule: &RecurrenceRule, dtstart: NaiveDateTime) -> Result<()> {
        let until = rule.until.naive_utc().max(dtstart);
        parse_set(&rule.unbounded_text(), dtstart, until)
            .map(|_| ())
            .map_err(|e| EngineError::InvalidRule(e.to_string()))
    }

    fn expand(
        &self,
        rule: &RecurrenceRule,
        dtstart: NaiveDateTime,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> Result<CivilTimes> {
        if window_end < dtstart || window_end < window_start {
            return Ok(Box::new(std::iter::empty()));
        }

        let anchor = fast_forward(rule, dtstart, window_start);
        // Stored rules were validated on create; a failure here is the evaluator's.
        let set = parse_set(&rule.unbounded_text(), anchor, window_end)
            .map_err(|e| EngineError::Expansion(e.to_string()))?
            .limit();
        Ok(Box::new(BatchedExpansion {
            dates: (&set).into_iter(),
            window_start,
            buffer: VecDeque::new(),
            batch_size: usize::from(self.batch_size),
            exhausted: false,
        }))
    }
}

/// Civil length of one period for rules made of nothing but `FREQ` and
/// `INTERVAL`, whose candidates are `dtstart + k * period`.
fn fixed_period(rule: &RecurrenceRule) -> Option<Duration> {
    if !rule.part_keys().all(|k| matches!(k, "FREQ" | "INTERVAL" | "WKST")) {
        return None;
    }
    let unit = match rule.frequency {
        Frequency::Secondly => Duration::seconds(1),
        Frequency::Minutely => Duration::minutes(1),
        Frequency::Hourly => Duration::hours(1),
        Frequency::Daily => Duration::days(1),
        Frequency::Weekly => Duration::weeks(1),
        Frequency::Monthly | Frequency::Yearly => return None,
    };
    unit.checked_mul(i32::try_from(rule.interval).ok()?)
}

/// Move `dtstart` to the last candidate at or before `window_start` when the
/// rule has a fixed period, so expansion does not walk the series prefix.
fn fast_forward(
    rule: &RecurrenceRule,
    dtstart: NaiveDateTime,
    window_start: NaiveDateTime,
) -> NaiveDateTime {
    let Some(period) = fixed_period(rule) else {
        return dtstart;
    };
    let elapsed = (window_start - dtstart).num_seconds();
    let step = period.num_seconds();
    if elapsed <= 0 || step <= 0 {
        return dtstart;
    }
    dtstart + Duration::seconds(elapsed / step * step)
}

/// Drains one live `rrule` iterator, materializing up to `batch_size`
/// candidates per refill.
struct BatchedExpansion {
    dates: RRuleSetIter,
    window_start: NaiveDateTime,
    buffer: VecDeque<NaiveDateTime>,
    batch_size: usize,
    exhausted: bool,
}

impl BatchedExpansion {
    fn refill(&mut self) {
        while self.buffer.len() < self.batch_size {
            let Some(dt) = self.dates.next() else {
                self.exhausted = true;
                return;
            };
            let civil = dt.with_timezone(&Utc).naive_utc();
            if civil >= self.window_start {
                self.buffer.push_back(civil);
            }
        }
    }
}

impl Iterator for BatchedExpansion {
    type Item = Result<NaiveDateTime>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(civil) = self.buffer.pop_front() {
                return Some(Ok(civil));
            }
            if self.exhausted {
                return None;
            }
            self.refill();
        }
    }
}
