//! Occurrence generation: recurrence + window → ascending UTC instants.
//!
//! Two strategies implement [`OccurrenceGenerator`]; the recurrence's stored
//! [`DayOfMonthPolicy`] picks one through [`Generators::for_policy`]. Both
//! produce wall-clock candidates and share the civil→UTC bounding stage in
//! this module.

mod clamped;
mod standard;

pub use clamped::ClampedMonthlyGenerator;
pub use standard::StandardGenerator;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;

use crate::civil::{self, CivilMapping};
use crate::error::Result;
use crate::evaluator::{CivilTimes, RuleEvaluator};
use crate::model::{DayOfMonthPolicy, RecurrenceDefinition};
use crate::rule::RecurrenceRule;
use crate::window::TimeWindow;

/// Lazily produced, ascending, duplicate-free UTC instants.
pub type Instants = Box<dyn Iterator<Item = Result<DateTime<Utc>>> + Send>;

pub trait OccurrenceGenerator: Send + Sync {
    /// Instants of `recurrence` inside both `window` and
    /// `[recurrence.start_time, recurrence.recurrence_end_time]`.
    fn generate(
        &self,
        recurrence: &RecurrenceDefinition,
        rule: &RecurrenceRule,
        window: TimeWindow,
    ) -> Result<Instants>;
}

/// The closed set of generation strategies.
#[derive(Clone)]
pub struct Generators {
    standard: StandardGenerator,
    clamped: ClampedMonthlyGenerator,
}

impl Generators {
    pub fn new(evaluator: Arc<dyn RuleEvaluator>) -> Self {
        let standard = StandardGenerator::new(evaluator);
        Self {
            clamped: ClampedMonthlyGenerator::new(standard.clone()),
            standard,
        }
    }

    pub fn for_policy(&self, policy: DayOfMonthPolicy) -> &dyn OccurrenceGenerator {
        match policy {
            DayOfMonthPolicy::Skip => &self.standard,
            DayOfMonthPolicy::Clamp => &self.clamped,
        }
    }

    /// Parse the recurrence's rule and run the strategy its policy selects.
    ///
    /// # Errors
    /// Returns `EngineError::InvalidRule` or `EngineError::InvalidTimezone`
    /// if the stored definition no longer parses.
    pub fn generate(&self, recurrence: &RecurrenceDefinition, window: TimeWindow) -> Result<Instants> {
        let rule = RecurrenceRule::parse(&recurrence.rule)?;
        self.for_policy(recurrence.day_of_month_policy)
            .generate(recurrence, &rule, window)
    }
}

/// Civil-time inputs shared by both strategies.
pub(crate) struct CivilPlan {
    pub tz: Tz,
    /// Wall-clock first occurrence.
    pub dtstart: NaiveDateTime,
    /// Day-aligned wall-clock span covering the UTC window.
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    /// Exact UTC bounds applied after conversion.
    bounds: Bounds,
    /// Stored first instant, which `dtstart` always maps back to.
    start_time: DateTime<Utc>,
}

#[derive(Clone, Copy)]
struct Bounds {
    lower: DateTime<Utc>,
    window_end: DateTime<Utc>,
    recurrence_end: DateTime<Utc>,
}

impl Bounds {
    fn admits(&self, instant: DateTime<Utc>) -> bool {
        self.lower <= instant && instant < self.window_end && instant <= self.recurrence_end
    }

    fn passed(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.window_end || instant > self.recurrence_end
    }
}

impl CivilPlan {
    /// `None` when the window and the recurrence span do not meet.
    pub(crate) fn new(recurrence: &RecurrenceDefinition, window: TimeWindow) -> Result<Option<Self>> {
        let tz = civil::parse_timezone(&recurrence.timezone)?;
        let lower = window.start.max(recurrence.start_time);
        if lower >= window.end || lower > recurrence.recurrence_end_time {
            return Ok(None);
        }
        let upper = window.end.min(recurrence.recurrence_end_time);

        // One day of padding each side absorbs any UTC offset.
        let window_start = civil::to_civil(lower, tz)
            .date()
            .checked_sub_days(Days::new(1))
            .map(|d| d.and_time(NaiveTime::MIN));
        let window_end = civil::to_civil(upper, tz)
            .date()
            .checked_add_days(Days::new(2))
            .map(|d| d.and_time(NaiveTime::MIN));
        let (Some(window_start), Some(window_end)) = (window_start, window_end) else {
            return Ok(None);
        };

        Ok(Some(Self {
            tz,
            dtstart: civil::to_civil(recurrence.start_time, tz),
            window_start,
            window_end,
            bounds: Bounds {
                lower,
                window_end: window.end,
                recurrence_end: recurrence.recurrence_end_time,
            },
            start_time: recurrence.start_time,
        }))
    }

    /// Convert ascending wall-clock candidates to bounded UTC instants.
    pub(crate) fn into_instants(self, candidates: CivilTimes) -> Instants {
        Box::new(BoundedInstants {
            candidates,
            tz: self.tz,
            bounds: self.bounds,
            dtstart: (self.dtstart, self.start_time),
            shifted: BinaryHeap::new(),
            ready: VecDeque::new(),
            last: None,
            done: false,
        })
    }
}

/// Maps candidates through the lenient converter and holds back gap-shifted
/// instants until no later candidate can map before them.
struct BoundedInstants {
    candidates: CivilTimes,
    tz: Tz,
    bounds: Bounds,
    dtstart: (NaiveDateTime, DateTime<Utc>),
    shifted: BinaryHeap<Reverse<DateTime<Utc>>>,
    ready: VecDeque<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
    done: bool,
}

impl BoundedInstants {
    fn release_shifted_up_to(&mut self, limit: DateTime<Utc>) {
        while let Some(Reverse(next)) = self.shifted.peek().copied() {
            if next > limit {
                break;
            }
            self.shifted.pop();
            self.ready.push_back(next);
        }
    }

    fn release_all_shifted(&mut self) {
        while let Some(Reverse(next)) = self.shifted.pop() {
            self.ready.push_back(next);
        }
    }

    /// Pull one candidate and stage whatever it makes emittable.
    fn advance(&mut self) -> Option<Result<()>> {
        let civil = match self.candidates.next() {
            None => {
                self.release_all_shifted();
                self.done = true;
                return None;
            }
            Some(Err(e)) => {
                self.done = true;
                return Some(Err(e));
            }
            Some(Ok(civil)) => civil,
        };

        // An ambiguous start keeps the offset it was stored with.
        let (instant, mapping) = if civil == self.dtstart.0 {
            (self.dtstart.1, CivilMapping::Exact)
        } else {
            civil::resolve_lenient(civil, self.tz)
        };
        if mapping == CivilMapping::Gap {
            if self.bounds.admits(instant) {
                self.shifted.push(Reverse(instant));
            }
            return Some(Ok(()));
        }

        if self.bounds.passed(instant) {
            self.release_all_shifted();
            self.done = true;
            return None;
        }
        self.release_shifted_up_to(instant);
        if self.bounds.admits(instant) {
            self.ready.push_back(instant);
        }
        Some(Ok(()))
    }
}

impl Iterator for BoundedInstants {
    type Item = Result<DateTime<Utc>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            while let Some(instant) = self.ready.pop_front() {
                if self.last.is_some_and(|last| instant <= last) {
                    continue;
                }
                self.last = Some(instant);
                return Some(Ok(instant));
            }
            if self.done {
                return None;
            }
            if let Some(Err(e)) = self.advance() {
                return Some(Err(e));
            }
        }
    }
}
