//! Half-open UTC query windows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// A `[start, end)` window in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// # Errors
    /// Returns `EngineError::InvalidInput` if `start` is after `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(EngineError::InvalidInput(format!(
                "window start {} is after end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse both bounds from RFC 3339 text.
    ///
    /// Each bound must carry an explicit offset or `Z`; a bare wall-clock
    /// value such as `2025-05-01T09:00:00` has no defined instant and is
    /// rejected.
    ///
    /// # Errors
    /// Returns `EngineError::InvalidInput` for unparseable or offset-less
    /// bounds, or when `start` is after `end`.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_instant(start)?, parse_instant(end)?)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// `start <= instant < end`.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Whether `[start, end)` overlaps this window. Adjacent ranges do not.
    pub fn intersects(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && self.start < end
    }
}

fn parse_instant(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            EngineError::InvalidInput(format!(
                "'{}' is not an instant with an explicit UTC offset: {}",
                text, e
            ))
        })
}
