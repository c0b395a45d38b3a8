//! Civil-time ↔ UTC conversion with DST-lenient resolution.
//!
//! All zone lookups go through `chrono-tz`, which compiles the full IANA
//! tzdata (historical and future rules). Fixed offsets and legacy platform
//! zone names are never consulted.
//!
//! Resolution policy for [`to_utc_lenient`]:
//!
//! - a wall-clock time inside a spring-forward gap does not exist; it is
//!   interpreted with the offset in force *before* the transition, which
//!   pushes it forward by the length of the gap (02:30 in a 1h gap → 03:30);
//! - a wall-clock time inside a fall-back overlap is ambiguous; the earlier
//!   instant (the branch with the pre-transition offset) is chosen.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{EngineError, Result};

/// Look up an IANA timezone identifier.
///
/// # Errors
/// Returns `EngineError::InvalidTimezone` if the identifier is unknown.
pub fn parse_timezone(timezone: &str) -> Result<Tz> {
    timezone
        .parse::<Tz>()
        .map_err(|_| EngineError::InvalidTimezone(timezone.to_string()))
}

/// Wall-clock date-time of `instant` in `tz`.
pub fn to_civil(instant: DateTime<Utc>, tz: Tz) -> NaiveDateTime {
    instant.with_timezone(&tz).naive_local()
}

/// How a wall-clock value was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CivilMapping {
    Exact,
    /// Fall-back overlap; the earlier instant was taken.
    Ambiguous,
    /// Spring-forward gap; the value was pushed forward by the gap length.
    Gap,
}

/// Map a wall-clock date-time in `tz` to a definite UTC instant.
///
/// Never fails: gaps and overlaps resolve per the module-level policy.
pub fn to_utc_lenient(civil: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    resolve_lenient(civil, tz).0
}

/// Like [`to_utc_lenient`], also reporting which resolution rule applied.
///
/// Exact and ambiguous resolutions are monotonic in `civil`; gap
/// resolutions can land after the instants of later wall-clock values.
pub fn resolve_lenient(civil: NaiveDateTime, tz: Tz) -> (DateTime<Utc>, CivilMapping) {
    match tz.from_local_datetime(&civil) {
        LocalResult::Single(dt) => (dt.with_timezone(&Utc), CivilMapping::Exact),
        LocalResult::Ambiguous(earliest, _) => (earliest.with_timezone(&Utc), CivilMapping::Ambiguous),
        LocalResult::None => {
            // Offset a day before the gap is the one the transition leaves behind.
            let day_before = civil - Duration::days(1);
            let before = tz.offset_from_utc_datetime(&day_before).fix();
            let utc = civil - Duration::seconds(i64::from(before.local_minus_utc()));
            (utc.and_utc(), CivilMapping::Gap)
        }
    }
}
