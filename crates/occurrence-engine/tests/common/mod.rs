//! Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use futures::TryStreamExt;
use occurrence_engine::store::memory::InMemoryStore;
use occurrence_engine::{
    CalendarEntry, CallContext, DayOfMonthPolicy, EngineConfig, EntryStream, Extensions,
    NewRecurrence, NewStandaloneOccurrence, RecurrenceEngine, Scope, Stores, TimeWindow,
};

pub fn utc(year: i32, month: u32, day: u32, hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, min, 0).unwrap()
}

pub fn window(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeWindow {
    TimeWindow::new(start, end).unwrap()
}

pub fn scope() -> Scope {
    Scope::new("tenant-a", "/calendars/team")
}

pub fn engine() -> (RecurrenceEngine, InMemoryStore) {
    engine_with_config(EngineConfig::default())
}

pub fn engine_with_config(config: EngineConfig) -> (RecurrenceEngine, InMemoryStore) {
    let store = InMemoryStore::new();
    let engine =
        RecurrenceEngine::with_config(Stores::shared(Arc::new(store.clone())), config).unwrap();
    (engine, store)
}

/// `rule` gets `;UNTIL=` appended from `until`.
pub fn new_recurrence(
    rule: &str,
    start: DateTime<Utc>,
    until: DateTime<Utc>,
    timezone: &str,
) -> NewRecurrence {
    NewRecurrence {
        scope: scope(),
        entry_type: "meeting".to_string(),
        rule: format!("{};UNTIL={}", rule, until.format("%Y%m%dT%H%M%SZ")),
        start_time: start,
        duration_minutes: 60,
        recurrence_end_time: until,
        timezone: timezone.to_string(),
        day_of_month_policy: DayOfMonthPolicy::Skip,
        extensions: Extensions::new(),
    }
}

pub fn new_standalone(start: DateTime<Utc>, duration_minutes: u32) -> NewStandaloneOccurrence {
    NewStandaloneOccurrence {
        scope: scope(),
        entry_type: "meeting".to_string(),
        start_time: start,
        duration_minutes,
        timezone: "UTC".to_string(),
        extensions: Extensions::new(),
    }
}

pub fn extensions(key: &str, value: &str) -> Extensions {
    let mut map = Extensions::new();
    map.insert(key.to_string(), serde_json::Value::String(value.to_string()));
    map
}

pub async fn collect(stream: EntryStream) -> Vec<CalendarEntry> {
    stream.try_collect().await.unwrap()
}

pub async fn query(engine: &RecurrenceEngine, window: TimeWindow) -> Vec<CalendarEntry> {
    collect(engine.get_occurrences(&CallContext::new(), scope(), window, None)).await
}

pub fn starts(entries: &[CalendarEntry]) -> Vec<DateTime<Utc>> {
    entries.iter().map(|e| e.start_time).collect()
}

/// Daily 09:00 UTC series, May 1-4 2025.
pub async fn daily_may(engine: &RecurrenceEngine) -> CalendarEntry {
    engine
        .create_recurrence(
            &CallContext::new(),
            new_recurrence("FREQ=DAILY", utc(2025, 5, 1, 9, 0), utc(2025, 5, 4, 9, 0), "UTC"),
        )
        .await
        .unwrap()
}

pub fn may_window() -> TimeWindow {
    window(utc(2025, 5, 1, 0, 0), utc(2025, 5, 5, 0, 0))
}
