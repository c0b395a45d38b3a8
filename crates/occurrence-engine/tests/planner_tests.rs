//! Per-instance update / delete / restore transitions.

mod common;

use chrono::Duration;
use common::*;
use occurrence_engine::{
    CalendarEntry, CallContext, EngineError, EntryKind, ErrorKind, OccurrenceException,
    RecurrenceEngine, TransactionId,
};
use occurrence_engine::store::memory::InMemoryStore;
use uuid::Uuid;

async fn series() -> (RecurrenceEngine, InMemoryStore, Vec<CalendarEntry>) {
    let (engine, store) = engine();
    daily_may(&engine).await;
    let entries = query(&engine, may_window()).await;
    assert_eq!(entries.len(), 4);
    (engine, store, entries)
}

fn moved(entry: &CalendarEntry, hour: u32) -> CalendarEntry {
    let mut entry = entry.clone();
    entry.start_time = entry.start_time + Duration::hours(i64::from(hour) - 9);
    entry
}

// ---------------------------------------------------------------------------
// Generated → Overridden → Overridden
// ---------------------------------------------------------------------------

#[tokio::test]
async fn update_generated_creates_override_with_snapshot() {
    let (engine, store, entries) = series().await;

    let updated = engine
        .update_occurrence(&CallContext::new(), &moved(&entries[2], 14))
        .await
        .unwrap();

    let overrides = store.overrides();
    assert_eq!(overrides.len(), 1);
    assert_eq!(overrides[0].original_time, utc(2025, 5, 3, 9, 0));
    assert_eq!(overrides[0].start_time, utc(2025, 5, 3, 14, 0));
    assert_eq!(overrides[0].original_duration_minutes, 60);
    assert_eq!(updated.override_id, Some(overrides[0].id));
    assert_eq!(updated.occurrence_id, entries[2].occurrence_id);
    assert!(store.exceptions().is_empty());
}

#[tokio::test]
async fn update_overridden_updates_in_place_and_keeps_first_snapshot() {
    let (engine, store, entries) = series().await;
    let ctx = CallContext::new();
    let first = engine
        .update_occurrence(&ctx, &moved(&entries[0], 10))
        .await
        .unwrap();

    // Series duration changes after the override exists.
    engine
        .update_recurrence(&ctx, &scope(), first.recurrence_id.unwrap(), 90, Default::default())
        .await
        .unwrap();

    let mut again = first.clone();
    again.start_time = utc(2025, 5, 1, 16, 0);
    again.duration_minutes = 15;
    let second = engine.update_occurrence(&ctx, &again).await.unwrap();

    let overrides = store.overrides();
    assert_eq!(overrides.len(), 1, "no second override for the same slot");
    assert_eq!(second.override_id, first.override_id);
    assert_eq!(overrides[0].start_time, utc(2025, 5, 1, 16, 0));
    assert_eq!(overrides[0].duration_minutes, 15);
    assert_eq!(
        second.original.as_ref().unwrap().duration_minutes,
        60,
        "snapshot taken when the override was first created"
    );
}

#[tokio::test]
async fn update_can_reach_overridden_entry_by_its_moved_start() {
    let (engine, _store, entries) = series().await;
    let ctx = CallContext::new();
    engine
        .update_occurrence(&ctx, &moved(&entries[1], 15))
        .await
        .unwrap();

    let fetched = query(&engine, may_window()).await;
    let overridden = fetched.iter().find(|e| e.override_id.is_some()).unwrap();
    let mut edit = overridden.clone();
    edit.extensions = extensions("note", "moved twice");
    edit.start_time = utc(2025, 5, 2, 17, 0);

    let result = engine.update_occurrence(&ctx, &edit).await.unwrap();
    assert_eq!(result.start_time, utc(2025, 5, 2, 17, 0));
    assert_eq!(result.original_time, Some(utc(2025, 5, 2, 9, 0)));
}

// ---------------------------------------------------------------------------
// → Excepted
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_generated_creates_exception_only() {
    let (engine, store, entries) = series().await;

    engine
        .delete_occurrence(&CallContext::new(), &entries[1])
        .await
        .unwrap();

    let exceptions = store.exceptions();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].original_time, utc(2025, 5, 2, 9, 0));
    assert!(store.overrides().is_empty());
    assert_eq!(query(&engine, may_window()).await.len(), 3);
}

#[tokio::test]
async fn delete_overridden_removes_override_and_excepts_original_slot() {
    let (engine, store, entries) = series().await;
    let ctx = CallContext::new();
    let overridden = engine
        .update_occurrence(&ctx, &moved(&entries[3], 20))
        .await
        .unwrap();

    engine.delete_occurrence(&ctx, &overridden).await.unwrap();

    assert!(store.overrides().is_empty());
    let exceptions = store.exceptions();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].original_time, utc(2025, 5, 4, 9, 0));
    assert_eq!(
        starts(&query(&engine, may_window()).await),
        vec![utc(2025, 5, 1, 9, 0), utc(2025, 5, 2, 9, 0), utc(2025, 5, 3, 9, 0)]
    );
}

#[tokio::test]
async fn excepted_slot_is_terminal() {
    let (engine, store, entries) = series().await;
    let ctx = CallContext::new();
    engine.delete_occurrence(&ctx, &entries[0]).await.unwrap();

    let update = engine
        .update_occurrence(&ctx, &moved(&entries[0], 12))
        .await
        .unwrap_err();
    let restore = engine.restore_occurrence(&ctx, &entries[0]).await.unwrap_err();
    let delete = engine.delete_occurrence(&ctx, &entries[0]).await.unwrap_err();

    assert_eq!(update.kind(), ErrorKind::InvariantViolation);
    assert_eq!(restore.kind(), ErrorKind::InvariantViolation);
    assert_eq!(delete.kind(), ErrorKind::NotFound);
    assert_eq!(store.exceptions().len(), 1);
    assert!(store.overrides().is_empty());
}

#[tokio::test]
async fn exception_wins_over_stale_override() {
    let (engine, store, entries) = series().await;
    let ctx = CallContext::new();
    let overridden = engine
        .update_occurrence(&ctx, &moved(&entries[1], 11))
        .await
        .unwrap();
    store.seed_exception(OccurrenceException {
        id: Uuid::new_v4(),
        recurrence_id: overridden.recurrence_id.unwrap(),
        original_time: utc(2025, 5, 2, 9, 0),
    });

    let fetched = query(&engine, may_window()).await;
    assert_eq!(fetched.len(), 3);
    assert!(fetched.iter().all(|e| e.override_id.is_none()));

    let err = engine.update_occurrence(&ctx, &overridden).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvariantViolation);
}

#[tokio::test]
async fn first_slot_in_repeated_hour_can_be_deleted() {
    let (engine, _store) = engine();
    engine
        .create_recurrence(
            &CallContext::new(),
            new_recurrence(
                "FREQ=DAILY",
                utc(2025, 11, 2, 6, 30),
                utc(2025, 11, 4, 6, 30),
                "America/New_York",
            ),
        )
        .await
        .unwrap();
    let days = window(utc(2025, 11, 2, 0, 0), utc(2025, 11, 5, 0, 0));
    let entries = query(&engine, days).await;
    assert_eq!(entries[0].start_time, utc(2025, 11, 2, 6, 30));

    engine
        .delete_occurrence(&CallContext::new(), &entries[0])
        .await
        .unwrap();

    assert_eq!(
        starts(&query(&engine, days).await),
        vec![utc(2025, 11, 3, 6, 30), utc(2025, 11, 4, 6, 30)]
    );
}

// ---------------------------------------------------------------------------
// Overridden → Generated
// ---------------------------------------------------------------------------

#[tokio::test]
async fn restore_overridden_deletes_override() {
    let (engine, store, entries) = series().await;
    let ctx = CallContext::new();
    let overridden = engine
        .update_occurrence(&ctx, &moved(&entries[2], 18))
        .await
        .unwrap();

    let restored = engine.restore_occurrence(&ctx, &overridden).await.unwrap();

    assert!(store.overrides().is_empty());
    assert!(store.exceptions().is_empty());
    assert_eq!(restored, entries[2]);
    assert_eq!(query(&engine, may_window()).await, entries);
}

#[tokio::test]
async fn restore_generated_is_rejected() {
    let (engine, store, entries) = series().await;

    let err = engine
        .restore_occurrence(&CallContext::new(), &entries[0])
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::InvariantViolation(_)));
    assert!(store.overrides().is_empty());
    assert!(store.exceptions().is_empty());
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn inherited_fields_are_immutable() {
    let (engine, store, entries) = series().await;
    let ctx = CallContext::new();

    let mut retyped = entries[0].clone();
    retyped.entry_type = "focus".to_string();
    let mut rezoned = entries[0].clone();
    rezoned.timezone = "Europe/Paris".to_string();

    for entry in [retyped, rezoned] {
        let err = engine.update_occurrence(&ctx, &entry).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    }
    assert!(store.overrides().is_empty());
}

#[tokio::test]
async fn pattern_entries_are_not_occurrences() {
    let (engine, _store) = engine();
    let ctx = CallContext::new();
    let pattern = daily_may(&engine).await;

    let update = engine.update_occurrence(&ctx, &pattern).await.unwrap_err();
    let delete = engine.delete_occurrence(&ctx, &pattern).await.unwrap_err();
    let restore = engine.restore_occurrence(&ctx, &pattern).await.unwrap_err();

    for err in [update, delete, restore] {
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    }
}

#[tokio::test]
async fn slot_the_series_never_produces_is_not_found() {
    let (engine, store, entries) = series().await;
    let mut forged = entries[0].clone();
    forged.original_time = Some(utc(2025, 5, 1, 10, 0));

    let err = engine
        .delete_occurrence(&CallContext::new(), &forged)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(store.exceptions().is_empty());
}

#[tokio::test]
async fn slot_after_series_end_is_not_found() {
    let (engine, _store, entries) = series().await;
    let mut forged = entries[3].clone();
    forged.original_time = Some(utc(2025, 5, 5, 9, 0));

    let err = engine
        .update_occurrence(&CallContext::new(), &forged)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn deleted_series_is_not_found() {
    let (engine, _store, entries) = series().await;
    let ctx = CallContext::new();
    engine
        .delete_recurrence(&ctx, &scope(), entries[0].recurrence_id.unwrap())
        .await
        .unwrap();

    let err = engine.update_occurrence(&ctx, &entries[0]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn stale_override_id_is_not_found() {
    let (engine, _store, entries) = series().await;
    let ctx = CallContext::new();
    let overridden = engine
        .update_occurrence(&ctx, &moved(&entries[0], 13))
        .await
        .unwrap();
    engine.restore_occurrence(&ctx, &overridden).await.unwrap();

    let err = engine.update_occurrence(&ctx, &overridden).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn zero_duration_update_is_rejected_before_storage() {
    let (engine, store, entries) = series().await;
    let calls_before = store.calls().len();
    let mut entry = entries[0].clone();
    entry.duration_minutes = 0;

    let err = engine
        .update_occurrence(&CallContext::new(), &entry)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Input);
    assert_eq!(store.calls().len(), calls_before);
}

#[tokio::test]
async fn storage_failure_during_mutation_propagates() {
    let (engine, store, entries) = series().await;
    store.set_failing(true);

    let err = engine
        .delete_occurrence(&CallContext::new(), &entries[0])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CollaboratorFailure);
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_call_of_a_mutation_carries_the_transaction() {
    let (engine, store, entries) = series().await;
    let ctx = CallContext::new().with_transaction(TransactionId(Uuid::new_v4()));
    let overridden = engine
        .update_occurrence(&ctx, &moved(&entries[0], 12))
        .await
        .unwrap();
    let calls_before = store.calls().len();

    engine.delete_occurrence(&ctx, &overridden).await.unwrap();

    let calls = store.calls()[calls_before..].to_vec();
    let operations: Vec<_> = calls.iter().map(|c| c.operation).collect();
    assert!(operations.contains(&"overrides.delete"));
    assert!(operations.contains(&"exceptions.create"));
    assert!(calls.iter().all(|c| c.transaction == ctx.transaction));
}

// ---------------------------------------------------------------------------
// Standalone entries through the occurrence path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn standalone_update_and_delete() {
    let (engine, _store) = engine();
    let ctx = CallContext::new();
    let created = engine
        .create_standalone_occurrence(&ctx, new_standalone(utc(2025, 5, 1, 9, 0), 30))
        .await
        .unwrap();

    let mut edit = created.clone();
    edit.start_time = utc(2025, 5, 1, 11, 0);
    edit.entry_type = "focus".to_string();
    let updated = engine.update_occurrence(&ctx, &edit).await.unwrap();
    assert_eq!(updated.kind, EntryKind::Standalone);
    assert_eq!(updated.occurrence_id, created.occurrence_id);
    assert_eq!(updated.end_time, utc(2025, 5, 1, 11, 30));

    let fetched = query(&engine, may_window()).await;
    assert_eq!(fetched, vec![updated.clone()]);

    engine.delete_occurrence(&ctx, &updated).await.unwrap();
    assert!(query(&engine, may_window()).await.is_empty());

    let err = engine.delete_occurrence(&ctx, &updated).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn standalone_cannot_be_restored() {
    let (engine, _store) = engine();
    let created = engine
        .create_standalone_occurrence(&CallContext::new(), new_standalone(utc(2025, 5, 1, 9, 0), 30))
        .await
        .unwrap();

    let err = engine
        .restore_occurrence(&CallContext::new(), &created)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvariantViolation);
}
