//! In-process reference adapter for all four storage ports.
//!
//! Records live in insertion-ordered vectors behind one lock, so range reads
//! return results in creation order. Each call is logged together with the
//! transaction it arrived under, which lets callers check that a multi-step
//! mutation stayed inside one unit of work.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use uuid::Uuid;

use super::{
    CallContext, ExceptionStore, OverrideStore, RangeQuery, RecurrenceStore, StandaloneStore,
    StoreResult, TransactionId,
};
use crate::error::StoreError;
use crate::model::{
    minutes, Extensions, OccurrenceException, OccurrenceOverride, RecurrenceDefinition, Scope,
    StandaloneOccurrence,
};

/// One logged store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub operation: &'static str,
    pub transaction: Option<TransactionId>,
}

#[derive(Debug, Default)]
struct Tables {
    recurrences: Vec<RecurrenceDefinition>,
    standalone: Vec<StandaloneOccurrence>,
    exceptions: Vec<OccurrenceException>,
    overrides: Vec<OccurrenceOverride>,
    calls: Vec<StoreCall>,
    failing: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a storage error.
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut tables) = self.tables.write() {
            tables.failing = failing;
        }
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.tables
            .read()
            .map(|t| t.calls.clone())
            .unwrap_or_default()
    }

    pub fn exceptions(&self) -> Vec<OccurrenceException> {
        self.tables
            .read()
            .map(|t| t.exceptions.clone())
            .unwrap_or_default()
    }

    pub fn overrides(&self) -> Vec<OccurrenceOverride> {
        self.tables
            .read()
            .map(|t| t.overrides.clone())
            .unwrap_or_default()
    }

    pub fn recurrences(&self) -> Vec<RecurrenceDefinition> {
        self.tables
            .read()
            .map(|t| t.recurrences.clone())
            .unwrap_or_default()
    }

    /// Insert records directly, bypassing engine validation.
    pub fn seed_exception(&self, exception: OccurrenceException) {
        if let Ok(mut tables) = self.tables.write() {
            tables.exceptions.push(exception);
        }
    }

    pub fn seed_override(&self, override_: OccurrenceOverride) {
        if let Ok(mut tables) = self.tables.write() {
            tables.overrides.push(override_);
        }
    }

    fn read(&self, ctx: &CallContext, operation: &'static str) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        // Log under a short write lock, then hand back a read guard.
        {
            let mut tables = self.write_raw()?;
            tables.calls.push(StoreCall {
                operation,
                transaction: ctx.transaction,
            });
            if tables.failing {
                return Err(StoreError::msg(format!("{} failed: store unavailable", operation)));
            }
        }
        self.tables
            .read()
            .map_err(|_| StoreError::msg("in-memory store lock poisoned"))
    }

    fn write(&self, ctx: &CallContext, operation: &'static str) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        let mut tables = self.write_raw()?;
        tables.calls.push(StoreCall {
            operation,
            transaction: ctx.transaction,
        });
        if tables.failing {
            return Err(StoreError::msg(format!("{} failed: store unavailable", operation)));
        }
        Ok(tables)
    }

    fn write_raw(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::msg("in-memory store lock poisoned"))
    }
}

fn into_stream<T: Send + 'static>(result: StoreResult<Vec<T>>) -> BoxStream<'static, StoreResult<T>> {
    match result {
        Ok(items) => stream::iter(items.into_iter().map(Ok)).boxed(),
        Err(e) => stream::once(async move { Err(e) }).boxed(),
    }
}

fn type_matches(filter: &Option<String>, entry_type: &str) -> bool {
    filter.as_deref().is_none_or(|t| t == entry_type)
}

fn not_found(what: &str, id: Uuid) -> StoreError {
    StoreError::msg(format!("{} {} does not exist", what, id))
}

#[async_trait]
impl RecurrenceStore for InMemoryStore {
    fn get_in_range(
        &self,
        ctx: &CallContext,
        query: RangeQuery,
    ) -> BoxStream<'static, StoreResult<RecurrenceDefinition>> {
        let found = self.read(ctx, "recurrences.get_in_range").map(|tables| {
            tables
                .recurrences
                .iter()
                .filter(|r| r.scope == query.scope && type_matches(&query.type_filter, &r.entry_type))
                .filter(|r| {
                    let span_meets = r.start_time < query.end
                        && query.start < r.recurrence_end_time + r.duration();
                    span_meets
                        || tables.overrides.iter().any(|o| {
                            o.recurrence_id == r.id
                                && shifted_intersects(o, query.start, query.end)
                        })
                })
                .cloned()
                .collect()
        });
        into_stream(found)
    }

    async fn get_by_id(
        &self,
        ctx: &CallContext,
        scope: &Scope,
        id: Uuid,
    ) -> StoreResult<Option<RecurrenceDefinition>> {
        let tables = self.read(ctx, "recurrences.get_by_id")?;
        Ok(tables
            .recurrences
            .iter()
            .find(|r| r.id == id && &r.scope == scope)
            .cloned())
    }

    async fn create(&self, ctx: &CallContext, recurrence: RecurrenceDefinition) -> StoreResult<()> {
        let mut tables = self.write(ctx, "recurrences.create")?;
        tables.recurrences.push(recurrence);
        Ok(())
    }

    async fn update(
        &self,
        ctx: &CallContext,
        id: Uuid,
        duration_minutes: u32,
        extensions: Extensions,
    ) -> StoreResult<()> {
        let mut tables = self.write(ctx, "recurrences.update")?;
        let recurrence = tables
            .recurrences
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| not_found("recurrence", id))?;
        recurrence.duration_minutes = duration_minutes;
        recurrence.extensions = extensions;
        Ok(())
    }

    async fn delete(&self, ctx: &CallContext, id: Uuid) -> StoreResult<()> {
        let mut tables = self.write(ctx, "recurrences.delete")?;
        tables.recurrences.retain(|r| r.id != id);
        tables.exceptions.retain(|e| e.recurrence_id != id);
        tables.overrides.retain(|o| o.recurrence_id != id);
        Ok(())
    }
}

#[async_trait]
impl StandaloneStore for InMemoryStore {
    fn get_in_range(
        &self,
        ctx: &CallContext,
        query: RangeQuery,
    ) -> BoxStream<'static, StoreResult<StandaloneOccurrence>> {
        let found = self.read(ctx, "standalone.get_in_range").map(|tables| {
            tables
                .standalone
                .iter()
                .filter(|s| s.scope == query.scope && type_matches(&query.type_filter, &s.entry_type))
                .filter(|s| s.start_time < query.end && query.start < s.end_time())
                .cloned()
                .collect()
        });
        into_stream(found)
    }

    async fn get_by_id(
        &self,
        ctx: &CallContext,
        scope: &Scope,
        id: Uuid,
    ) -> StoreResult<Option<StandaloneOccurrence>> {
        let tables = self.read(ctx, "standalone.get_by_id")?;
        Ok(tables
            .standalone
            .iter()
            .find(|s| s.id == id && &s.scope == scope)
            .cloned())
    }

    async fn create(&self, ctx: &CallContext, occurrence: StandaloneOccurrence) -> StoreResult<()> {
        let mut tables = self.write(ctx, "standalone.create")?;
        tables.standalone.push(occurrence);
        Ok(())
    }

    async fn update(&self, ctx: &CallContext, occurrence: StandaloneOccurrence) -> StoreResult<()> {
        let mut tables = self.write(ctx, "standalone.update")?;
        let slot = tables
            .standalone
            .iter_mut()
            .find(|s| s.id == occurrence.id)
            .ok_or_else(|| not_found("standalone occurrence", occurrence.id))?;
        *slot = occurrence;
        Ok(())
    }

    async fn delete(&self, ctx: &CallContext, id: Uuid) -> StoreResult<()> {
        let mut tables = self.write(ctx, "standalone.delete")?;
        tables.standalone.retain(|s| s.id != id);
        Ok(())
    }
}

#[async_trait]
impl ExceptionStore for InMemoryStore {
    fn get_by_recurrence_ids(
        &self,
        ctx: &CallContext,
        recurrence_ids: Vec<Uuid>,
    ) -> BoxStream<'static, StoreResult<OccurrenceException>> {
        let found = self.read(ctx, "exceptions.get_by_recurrence_ids").map(|tables| {
            tables
                .exceptions
                .iter()
                .filter(|e| recurrence_ids.contains(&e.recurrence_id))
                .cloned()
                .collect()
        });
        into_stream(found)
    }

    async fn create(&self, ctx: &CallContext, exception: OccurrenceException) -> StoreResult<()> {
        let mut tables = self.write(ctx, "exceptions.create")?;
        tables.exceptions.push(exception);
        Ok(())
    }

    async fn delete_by_recurrence_id(
        &self,
        ctx: &CallContext,
        recurrence_id: Uuid,
    ) -> StoreResult<()> {
        let mut tables = self.write(ctx, "exceptions.delete_by_recurrence_id")?;
        tables.exceptions.retain(|e| e.recurrence_id != recurrence_id);
        Ok(())
    }
}

fn shifted_intersects(o: &OccurrenceOverride, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    o.start_time < end && start < o.start_time + minutes(o.duration_minutes)
}

fn override_in_range(o: &OccurrenceOverride, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    let original_in_range = start <= o.original_time && o.original_time < end;
    original_in_range || shifted_intersects(o, start, end)
}

#[async_trait]
impl OverrideStore for InMemoryStore {
    fn get_by_recurrence_ids(
        &self,
        ctx: &CallContext,
        recurrence_ids: Vec<Uuid>,
    ) -> BoxStream<'static, StoreResult<OccurrenceOverride>> {
        let found = self.read(ctx, "overrides.get_by_recurrence_ids").map(|tables| {
            tables
                .overrides
                .iter()
                .filter(|o| recurrence_ids.contains(&o.recurrence_id))
                .cloned()
                .collect()
        });
        into_stream(found)
    }

    fn get_in_range(
        &self,
        ctx: &CallContext,
        recurrence_ids: Vec<Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxStream<'static, StoreResult<OccurrenceOverride>> {
        let found = self.read(ctx, "overrides.get_in_range").map(|tables| {
            tables
                .overrides
                .iter()
                .filter(|o| recurrence_ids.contains(&o.recurrence_id))
                .filter(|o| override_in_range(o, start, end))
                .cloned()
                .collect()
        });
        into_stream(found)
    }

    async fn get_by_id(&self, ctx: &CallContext, id: Uuid) -> StoreResult<Option<OccurrenceOverride>> {
        let tables = self.read(ctx, "overrides.get_by_id")?;
        Ok(tables.overrides.iter().find(|o| o.id == id).cloned())
    }

    async fn create(&self, ctx: &CallContext, override_: OccurrenceOverride) -> StoreResult<()> {
        let mut tables = self.write(ctx, "overrides.create")?;
        tables.overrides.push(override_);
        Ok(())
    }

    async fn update(&self, ctx: &CallContext, override_: OccurrenceOverride) -> StoreResult<()> {
        let mut tables = self.write(ctx, "overrides.update")?;
        let slot = tables
            .overrides
            .iter_mut()
            .find(|o| o.id == override_.id)
            .ok_or_else(|| not_found("override", override_.id))?;
        *slot = override_;
        Ok(())
    }

    async fn delete(&self, ctx: &CallContext, id: Uuid) -> StoreResult<()> {
        let mut tables = self.write(ctx, "overrides.delete")?;
        tables.overrides.retain(|o| o.id != id);
        Ok(())
    }

    async fn delete_by_recurrence_id(
        &self,
        ctx: &CallContext,
        recurrence_id: Uuid,
    ) -> StoreResult<()> {
        let mut tables = self.write(ctx, "overrides.delete_by_recurrence_id")?;
        tables.overrides.retain(|o| o.recurrence_id != recurrence_id);
        Ok(())
    }
}
