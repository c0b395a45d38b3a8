//! Persisted records and the computed `CalendarEntry` result shape.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form, caller-owned payload carried on every record.
pub type Extensions = serde_json::Map<String, serde_json::Value>;

/// Tenant and resource-path keys every record lives under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub tenant_id: String,
    pub resource_path: String,
}

impl Scope {
    pub fn new(tenant_id: impl Into<String>, resource_path: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            resource_path: resource_path.into(),
        }
    }
}

/// What to do when a by-month-day rule names a day the month does not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DayOfMonthPolicy {
    /// Skip the month (RFC 5545 behaviour).
    #[default]
    Skip,
    /// Use the last day of the month instead.
    Clamp,
}

pub(crate) fn minutes(duration_minutes: u32) -> Duration {
    Duration::minutes(i64::from(duration_minutes))
}

/// A repeating series: rule, bounded window, and timezone.
///
/// Only `duration_minutes` and `extensions` change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceDefinition {
    pub id: Uuid,
    pub scope: Scope,
    pub entry_type: String,
    /// RFC 5545 RRULE text with an explicit `UNTIL`.
    pub rule: String,
    /// UTC instant of the first occurrence; its wall-clock time in
    /// `timezone` is the time of day of every occurrence.
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub recurrence_end_time: DateTime<Utc>,
    /// IANA identifier.
    pub timezone: String,
    pub day_of_month_policy: DayOfMonthPolicy,
    pub extensions: Extensions,
}

impl RecurrenceDefinition {
    pub fn duration(&self) -> Duration {
        minutes(self.duration_minutes)
    }
}

/// Input to `RecurrenceEngine::create_recurrence`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecurrence {
    pub scope: Scope,
    pub entry_type: String,
    pub rule: String,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub recurrence_end_time: DateTime<Utc>,
    pub timezone: String,
    #[serde(default)]
    pub day_of_month_policy: DayOfMonthPolicy,
    #[serde(default)]
    pub extensions: Extensions,
}

/// A non-repeating entry, unrelated to any series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandaloneOccurrence {
    pub id: Uuid,
    pub scope: Scope,
    pub entry_type: String,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub timezone: String,
    pub extensions: Extensions,
}

impl StandaloneOccurrence {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + minutes(self.duration_minutes)
    }
}

/// Input to `RecurrenceEngine::create_standalone_occurrence`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStandaloneOccurrence {
    pub scope: Scope,
    pub entry_type: String,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub timezone: String,
    #[serde(default)]
    pub extensions: Extensions,
}

/// Permanent cancellation of one generated slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceException {
    pub id: Uuid,
    pub recurrence_id: Uuid,
    /// Generated (pre-override) start of the cancelled slot.
    pub original_time: DateTime<Utc>,
}

/// Replacement time, duration and extensions for one generated slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccurrenceOverride {
    pub id: Uuid,
    pub recurrence_id: Uuid,
    /// Generated (pre-override) start of the modified slot.
    pub original_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
    /// Pattern duration when the override was first created.
    pub original_duration_minutes: u32,
    /// Pattern extensions when the override was first created.
    pub original_extensions: Extensions,
    pub extensions: Extensions,
}

impl OccurrenceOverride {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + minutes(self.duration_minutes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    Pattern,
    Standalone,
    Virtualized,
}

/// Pattern-derived values of a slot, before its override applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginalSnapshot {
    pub start_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub extensions: Extensions,
}

/// Computed result shape. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub scope: Scope,
    pub entry_type: String,
    pub kind: EntryKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: u32,
    pub timezone: String,
    pub extensions: Extensions,
    pub recurrence_id: Option<Uuid>,
    pub occurrence_id: Option<Uuid>,
    pub override_id: Option<Uuid>,
    /// Generated slot a virtualized entry belongs to.
    pub original_time: Option<DateTime<Utc>>,
    /// Present only on virtualized entries with an override applied.
    pub original: Option<OriginalSnapshot>,
    /// Pattern-only fields.
    pub rule: Option<String>,
    pub recurrence_end_time: Option<DateTime<Utc>>,
    pub day_of_month_policy: Option<DayOfMonthPolicy>,
}

/// Stable id of the slot `original_time` of series `recurrence_id`.
pub fn virtual_occurrence_id(recurrence_id: Uuid, original_time: DateTime<Utc>) -> Uuid {
    Uuid::new_v5(&recurrence_id, original_time.to_rfc3339().as_bytes())
}

impl CalendarEntry {
    pub fn from_pattern(recurrence: &RecurrenceDefinition) -> Self {
        Self {
            scope: recurrence.scope.clone(),
            entry_type: recurrence.entry_type.clone(),
            kind: EntryKind::Pattern,
            start_time: recurrence.start_time,
            end_time: recurrence.start_time + recurrence.duration(),
            duration_minutes: recurrence.duration_minutes,
            timezone: recurrence.timezone.clone(),
            extensions: recurrence.extensions.clone(),
            recurrence_id: Some(recurrence.id),
            occurrence_id: None,
            override_id: None,
            original_time: None,
            original: None,
            rule: Some(recurrence.rule.clone()),
            recurrence_end_time: Some(recurrence.recurrence_end_time),
            day_of_month_policy: Some(recurrence.day_of_month_policy),
        }
    }

    pub fn from_standalone(occurrence: &StandaloneOccurrence) -> Self {
        Self {
            scope: occurrence.scope.clone(),
            entry_type: occurrence.entry_type.clone(),
            kind: EntryKind::Standalone,
            start_time: occurrence.start_time,
            end_time: occurrence.end_time(),
            duration_minutes: occurrence.duration_minutes,
            timezone: occurrence.timezone.clone(),
            extensions: occurrence.extensions.clone(),
            recurrence_id: None,
            occurrence_id: Some(occurrence.id),
            override_id: None,
            original_time: None,
            original: None,
            rule: None,
            recurrence_end_time: None,
            day_of_month_policy: None,
        }
    }

    /// A generated slot with no override.
    pub fn virtualized(recurrence: &RecurrenceDefinition, slot: DateTime<Utc>) -> Self {
        Self {
            scope: recurrence.scope.clone(),
            entry_type: recurrence.entry_type.clone(),
            kind: EntryKind::Virtualized,
            start_time: slot,
            end_time: slot + recurrence.duration(),
            duration_minutes: recurrence.duration_minutes,
            timezone: recurrence.timezone.clone(),
            extensions: recurrence.extensions.clone(),
            recurrence_id: Some(recurrence.id),
            occurrence_id: Some(virtual_occurrence_id(recurrence.id, slot)),
            override_id: None,
            original_time: Some(slot),
            original: None,
            rule: None,
            recurrence_end_time: None,
            day_of_month_policy: None,
        }
    }

    /// A generated slot with `override_` applied.
    pub fn overridden(recurrence: &RecurrenceDefinition, override_: &OccurrenceOverride) -> Self {
        Self {
            scope: recurrence.scope.clone(),
            entry_type: recurrence.entry_type.clone(),
            kind: EntryKind::Virtualized,
            start_time: override_.start_time,
            end_time: override_.end_time(),
            duration_minutes: override_.duration_minutes,
            timezone: recurrence.timezone.clone(),
            extensions: override_.extensions.clone(),
            recurrence_id: Some(recurrence.id),
            occurrence_id: Some(virtual_occurrence_id(recurrence.id, override_.original_time)),
            override_id: Some(override_.id),
            original_time: Some(override_.original_time),
            original: Some(OriginalSnapshot {
                start_time: override_.original_time,
                duration_minutes: override_.original_duration_minutes,
                extensions: override_.original_extensions.clone(),
            }),
            rule: None,
            recurrence_end_time: None,
            day_of_month_policy: None,
        }
    }

    /// The generated slot this entry occupies, if it is virtualized.
    pub fn slot_time(&self) -> Option<DateTime<Utc>> {
        if self.kind != EntryKind::Virtualized {
            return None;
        }
        self.original_time
            .or_else(|| self.original.as_ref().map(|o| o.start_time))
    }
}
