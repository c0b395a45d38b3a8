//! Monthly by-day-of-month expansion that clamps to the month's last day.
//!
//! `BYMONTHDAY=31` yields Feb 28 (Feb 29 in leap years), Apr 30, and so on,
//! where RFC 5545 would skip those months. Negative days count from the end
//! of the month and clamp to the 1st. Rules outside the plain monthly
//! by-month-day shape have no out-of-range days to clamp and go through the
//! standard strategy unchanged.

use std::collections::VecDeque;

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::trace;

use super::{CivilPlan, Instants, OccurrenceGenerator, StandardGenerator};
use crate::error::Result;
use crate::model::RecurrenceDefinition;
use crate::rule::{Frequency, RecurrenceRule};
use crate::window::TimeWindow;

const CLAMPABLE_PARTS: [&str; 5] = ["FREQ", "INTERVAL", "BYMONTHDAY", "BYMONTH", "WKST"];

#[derive(Clone)]
pub struct ClampedMonthlyGenerator {
    fallback: StandardGenerator,
}

impl ClampedMonthlyGenerator {
    pub fn new(fallback: StandardGenerator) -> Self {
        Self { fallback }
    }

    fn applies_to(rule: &RecurrenceRule) -> bool {
        rule.frequency == Frequency::Monthly && rule.part_keys().all(|k| CLAMPABLE_PARTS.contains(&k))
    }
}

impl OccurrenceGenerator for ClampedMonthlyGenerator {
    fn generate(
        &self,
        recurrence: &RecurrenceDefinition,
        rule: &RecurrenceRule,
        window: TimeWindow,
    ) -> Result<Instants> {
        if !Self::applies_to(rule) {
            return self.fallback.generate(recurrence, rule, window);
        }
        let Some(plan) = CivilPlan::new(recurrence, window)? else {
            return Ok(Box::new(std::iter::empty()));
        };
        trace!(recurrence_id = %recurrence.id, "expanding clamped monthly rule");

        let days = if rule.by_month_day.is_empty() {
            vec![plan.dtstart.day() as i8]
        } else {
            rule.by_month_day.clone()
        };
        let candidates = ClampedMonths::new(
            plan.dtstart,
            rule.interval,
            days,
            rule.by_month.clone(),
            plan.window_start,
            plan.window_end,
        );
        Ok(plan.into_instants(Box::new(candidates.map(Ok))))
    }
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn days_in_month(first: NaiveDate) -> u32 {
    first
        .checked_add_months(Months::new(1))
        .map(|next| (next - first).num_days() as u32)
        .unwrap_or(31)
}

/// Resolve a possibly negative, possibly out-of-range day number.
fn clamp_day(day: i8, month_len: u32) -> u32 {
    if day > 0 {
        (day as u32).min(month_len)
    } else {
        let from_end = i64::from(month_len) + 1 + i64::from(day);
        from_end.max(1) as u32
    }
}

fn months_between(from: NaiveDate, to: NaiveDate) -> i64 {
    i64::from(to.year() - from.year()) * 12 + i64::from(to.month()) - i64::from(from.month())
}

/// Wall-clock candidates, ascending, one month at a time.
struct ClampedMonths {
    dtstart: NaiveDateTime,
    anchor: NaiveDate,
    time: NaiveTime,
    interval: u32,
    days: Vec<i8>,
    months: Vec<u8>,
    /// Months since `anchor` of the next month to visit.
    offset: u32,
    window_start: NaiveDateTime,
    window_end: NaiveDateTime,
    buffer: VecDeque<NaiveDateTime>,
    done: bool,
}

impl ClampedMonths {
    fn new(
        dtstart: NaiveDateTime,
        interval: u32,
        days: Vec<i8>,
        months: Vec<u8>,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> Self {
        let anchor = first_of_month(dtstart.date());
        // Skip straight to the first interval-aligned month at or after the window.
        let gap = months_between(anchor, window_start.date()).max(0) as u32;
        let offset = gap.div_ceil(interval) * interval;
        Self {
            dtstart,
            anchor,
            time: dtstart.time(),
            interval,
            days,
            months,
            offset,
            window_start,
            window_end,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    fn fill_next_month(&mut self) {
        let Some(first) = self.anchor.checked_add_months(Months::new(self.offset)) else {
            self.done = true;
            return;
        };
        if first.and_time(NaiveTime::MIN) > self.window_end {
            self.done = true;
            return;
        }
        self.offset = self.offset.saturating_add(self.interval);

        if !self.months.is_empty() && !self.months.contains(&(first.month() as u8)) {
            return;
        }

        let len = days_in_month(first);
        let mut days: Vec<u32> = self.days.iter().map(|d| clamp_day(*d, len)).collect();
        days.sort_unstable();
        days.dedup();

        for day in days {
            let Some(date) = first.with_day(day) else {
                continue;
            };
            let candidate = date.and_time(self.time);
            if candidate >= self.dtstart
                && candidate >= self.window_start
                && candidate <= self.window_end
            {
                self.buffer.push_back(candidate);
            }
        }
    }
}

impl Iterator for ClampedMonths {
    type Item = NaiveDateTime;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(candidate) = self.buffer.pop_front() {
                return Some(candidate);
            }
            if self.done {
                return None;
            }
            self.fill_next_month();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn clamp_day_handles_both_ends() {
        assert_eq!(clamp_day(31, 28), 28);
        assert_eq!(clamp_day(31, 29), 29);
        assert_eq!(clamp_day(15, 30), 15);
        assert_eq!(clamp_day(-1, 30), 30);
        assert_eq!(clamp_day(-31, 28), 1);
    }

    #[test]
    fn interval_alignment_skips_ahead_to_window() {
        let dtstart = date(2025, 1, 31).and_hms_opt(10, 0, 0).unwrap();
        let months: Vec<NaiveDateTime> = ClampedMonths::new(
            dtstart,
            2,
            vec![31],
            vec![],
            date(2025, 2, 1).and_time(NaiveTime::MIN),
            date(2025, 7, 1).and_time(NaiveTime::MIN),
        )
        .collect();
        // Jan + 2n months: Mar 31, May 31.
        assert_eq!(
            months,
            vec![
                date(2025, 3, 31).and_hms_opt(10, 0, 0).unwrap(),
                date(2025, 5, 31).and_hms_opt(10, 0, 0).unwrap(),
            ]
        );
    }
}
