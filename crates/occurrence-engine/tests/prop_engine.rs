//! Property-based tests for generation and resolution using proptest.
//!
//! These check invariants that must hold for any bounded rule, timezone and
//! window, not just the fixed scenarios in the other test files.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::*;
use occurrence_engine::evaluator::RRuleEvaluator;
use occurrence_engine::generator::Generators;
use occurrence_engine::resolver::SlotResolver;
use occurrence_engine::{
    CallContext, DayOfMonthPolicy, Extensions, OccurrenceException, OccurrenceOverride,
    RecurrenceDefinition,
};
use proptest::prelude::*;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn arb_rule() -> impl Strategy<Value = String> {
    prop_oneof![
        (1u32..=6).prop_map(|i| format!("FREQ=HOURLY;INTERVAL={}", i * 3)),
        (1u32..=3).prop_map(|i| format!("FREQ=DAILY;INTERVAL={}", i)),
        Just("FREQ=WEEKLY;BYDAY=MO,WE,FR".to_string()),
        Just("FREQ=WEEKLY;INTERVAL=2;BYDAY=TU".to_string()),
        (1i8..=31).prop_map(|d| format!("FREQ=MONTHLY;BYMONTHDAY={}", d)),
        Just("FREQ=MONTHLY;BYMONTHDAY=-1".to_string()),
    ]
}

fn arb_timezone() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("UTC".to_string()),
        Just("America/New_York".to_string()),
        Just("America/Los_Angeles".to_string()),
        Just("Europe/London".to_string()),
        Just("Asia/Tokyo".to_string()),
        Just("Australia/Lord_Howe".to_string()),
    ]
}

fn arb_policy() -> impl Strategy<Value = DayOfMonthPolicy> {
    prop_oneof![Just(DayOfMonthPolicy::Skip), Just(DayOfMonthPolicy::Clamp)]
}

/// A start in 2025, on the quarter hour.
fn arb_instant() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..365 * 96).prop_map(|q| utc(2025, 1, 1, 0, 0) + Duration::minutes(q * 15))
}

fn arb_recurrence() -> impl Strategy<Value = RecurrenceDefinition> {
    (arb_rule(), arb_timezone(), arb_policy(), arb_instant(), 1i64..=400).prop_map(
        |(rule, timezone, policy, start, days)| {
            let until = start + Duration::days(days);
            RecurrenceDefinition {
                id: Uuid::new_v4(),
                scope: scope(),
                entry_type: "meeting".to_string(),
                rule: format!("{};UNTIL={}", rule, until.format("%Y%m%dT%H%M%SZ")),
                start_time: start,
                duration_minutes: 45,
                recurrence_end_time: until,
                timezone,
                day_of_month_policy: policy,
                extensions: Extensions::new(),
            }
        },
    )
}

/// Window of up to 60 days starting anywhere in 2025.
fn arb_window() -> impl Strategy<Value = (DateTime<Utc>, DateTime<Utc>)> {
    (arb_instant(), 0i64..60 * 24).prop_map(|(start, hours)| (start, start + Duration::hours(hours)))
}

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    }
}

fn generate(rec: &RecurrenceDefinition, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    Generators::new(Arc::new(RRuleEvaluator::default()))
        .generate(rec, window(start, end))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config())]

    #[test]
    fn instants_stay_inside_window_and_series(
        rec in arb_recurrence(),
        (start, end) in arb_window(),
    ) {
        for instant in generate(&rec, start, end) {
            prop_assert!(start <= instant && instant < end, "{} outside window", instant);
            prop_assert!(rec.start_time <= instant, "{} before series start", instant);
            prop_assert!(instant <= rec.recurrence_end_time, "{} after series end", instant);
        }
    }

    #[test]
    fn instants_are_strictly_ascending(
        rec in arb_recurrence(),
        (start, end) in arb_window(),
    ) {
        let instants = generate(&rec, start, end);
        for pair in instants.windows(2) {
            prop_assert!(pair[0] < pair[1], "{} then {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn generation_is_idempotent(
        rec in arb_recurrence(),
        (start, end) in arb_window(),
    ) {
        prop_assert_eq!(generate(&rec, start, end), generate(&rec, start, end));
    }

    #[test]
    fn split_windows_partition_the_whole(
        rec in arb_recurrence(),
        (start, end) in arb_window(),
        cut in 0.0f64..=1.0,
    ) {
        let span = (end - start).num_minutes();
        let mid = start + Duration::minutes((span as f64 * cut) as i64);

        let mut halves = generate(&rec, start, mid);
        halves.extend(generate(&rec, mid, end));

        prop_assert_eq!(halves, generate(&rec, start, end));
    }

    #[test]
    fn clamp_only_adds_month_end_days(
        rec in arb_recurrence(),
        (start, end) in arb_window(),
    ) {
        let skip = RecurrenceDefinition { day_of_month_policy: DayOfMonthPolicy::Skip, ..rec.clone() };
        let clamp = RecurrenceDefinition { day_of_month_policy: DayOfMonthPolicy::Clamp, ..rec };

        let skipped: HashSet<_> = generate(&skip, start, end).into_iter().collect();
        let clamped: HashSet<_> = generate(&clamp, start, end).into_iter().collect();

        prop_assert!(skipped.is_subset(&clamped));
    }

    #[test]
    fn excepted_slots_never_surface(
        rec in arb_recurrence(),
        (start, end) in arb_window(),
        picks in proptest::collection::vec(any::<prop::sample::Index>(), 0..5),
        moves in proptest::collection::vec((any::<prop::sample::Index>(), -48i64..48), 0..5),
    ) {
        let w = window(start, end);
        let instants = generate(&rec, start, end);
        prop_assume!(!instants.is_empty());

        let exceptions: Vec<_> = picks
            .iter()
            .map(|i| OccurrenceException {
                id: Uuid::new_v4(),
                recurrence_id: rec.id,
                original_time: instants[i.index(instants.len())],
            })
            .collect();
        let overrides: Vec<_> = moves
            .iter()
            .map(|(i, hours)| {
                let slot = instants[i.index(instants.len())];
                OccurrenceOverride {
                    id: Uuid::new_v4(),
                    recurrence_id: rec.id,
                    original_time: slot,
                    start_time: slot + Duration::hours(*hours),
                    duration_minutes: 30,
                    original_duration_minutes: rec.duration_minutes,
                    original_extensions: Extensions::new(),
                    extensions: Extensions::new(),
                }
            })
            .collect();
        let excepted: HashSet<_> = exceptions.iter().map(|e| e.original_time).collect();

        let resolver = SlotResolver::new(rec.clone(), &exceptions, &overrides, w);
        let entries: Vec<_> = resolver
            .resolve(Box::new(instants.clone().into_iter().map(Ok)))
            .collect::<Result<_, _>>()
            .unwrap();

        let mut seen = HashSet::new();
        for entry in &entries {
            let slot = entry.original_time.unwrap();
            prop_assert!(!excepted.contains(&slot), "excepted slot {} surfaced", slot);
            prop_assert!(seen.insert(slot), "slot {} emitted twice", slot);
            prop_assert!(w.contains(entry.start_time), "{} outside window", entry.start_time);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, ..ProptestConfig::default() })]

    #[test]
    fn engine_queries_are_idempotent(
        rec in arb_recurrence(),
        (start, end) in arb_window(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let (engine, _store) = engine();
            let mut new = new_recurrence("FREQ=DAILY", rec.start_time, rec.recurrence_end_time, &rec.timezone);
            new.rule = rec.rule.clone();
            new.day_of_month_policy = rec.day_of_month_policy;
            engine.create_recurrence(&CallContext::new(), new).await.unwrap();

            let first = query(&engine, window(start, end)).await;
            let second = query(&engine, window(start, end)).await;
            assert_eq!(first, second);
            assert!(first.iter().all(|e| start <= e.start_time && e.start_time < end));
        });
    }
}
