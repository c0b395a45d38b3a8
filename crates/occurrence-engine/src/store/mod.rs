//! Storage ports the engine drives.
//!
//! Query construction, indexes, retries and locking all live behind these
//! traits. Every call receives the caller's [`CallContext`] so adapters can
//! honour cancellation and enlist the call in the caller's unit of work.

pub mod memory;

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::TryStreamExt;
use uuid::Uuid;

use crate::error::{EngineError, Result, StoreError};
use crate::model::{
    Extensions, OccurrenceException, OccurrenceOverride, RecurrenceDefinition, Scope,
    StandaloneOccurrence,
};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Opaque handle the storage adapter maps to one of its transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub Uuid);

/// Per-call cancellation signal and optional unit of work.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub cancellation: tokio_util::sync::CancellationToken,
    pub transaction: Option<TransactionId>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transaction(mut self, transaction: TransactionId) -> Self {
        self.transaction = Some(transaction);
        self
    }

    pub fn with_cancellation(mut self, token: tokio_util::sync::CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Await a store call unless the context is cancelled first.
pub(crate) async fn guarded<T>(
    ctx: &CallContext,
    call: impl Future<Output = StoreResult<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = ctx.cancellation.cancelled() => Err(EngineError::Cancelled),
        result = call => result.map_err(EngineError::from),
    }
}

/// Drain a store stream, honouring cancellation.
pub(crate) async fn collect_all<T>(
    ctx: &CallContext,
    stream: BoxStream<'static, StoreResult<T>>,
) -> Result<Vec<T>> {
    guarded(ctx, stream.try_collect::<Vec<T>>()).await
}

/// Arguments of a scoped range read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    pub scope: Scope,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub type_filter: Option<String>,
}

#[async_trait]
pub trait RecurrenceStore: Send + Sync {
    /// Series in `query.scope` whose span may produce entries in the range,
    /// plus series owning an override whose moved `[start, end)` meets it.
    fn get_in_range(
        &self,
        ctx: &CallContext,
        query: RangeQuery,
    ) -> BoxStream<'static, StoreResult<RecurrenceDefinition>>;

    async fn get_by_id(
        &self,
        ctx: &CallContext,
        scope: &Scope,
        id: Uuid,
    ) -> StoreResult<Option<RecurrenceDefinition>>;

    async fn create(&self, ctx: &CallContext, recurrence: RecurrenceDefinition) -> StoreResult<()>;

    /// Replace duration and extensions; nothing else is mutable.
    async fn update(
        &self,
        ctx: &CallContext,
        id: Uuid,
        duration_minutes: u32,
        extensions: Extensions,
    ) -> StoreResult<()>;

    /// Must also delete the series' exceptions and overrides.
    async fn delete(&self, ctx: &CallContext, id: Uuid) -> StoreResult<()>;
}

#[async_trait]
pub trait StandaloneStore: Send + Sync {
    /// Entries in `query.scope` whose `[start, end)` intersects the range.
    fn get_in_range(
        &self,
        ctx: &CallContext,
        query: RangeQuery,
    ) -> BoxStream<'static, StoreResult<StandaloneOccurrence>>;

    async fn get_by_id(
        &self,
        ctx: &CallContext,
        scope: &Scope,
        id: Uuid,
    ) -> StoreResult<Option<StandaloneOccurrence>>;

    async fn create(&self, ctx: &CallContext, occurrence: StandaloneOccurrence) -> StoreResult<()>;

    async fn update(&self, ctx: &CallContext, occurrence: StandaloneOccurrence) -> StoreResult<()>;

    async fn delete(&self, ctx: &CallContext, id: Uuid) -> StoreResult<()>;
}

#[async_trait]
pub trait ExceptionStore: Send + Sync {
    fn get_by_recurrence_ids(
        &self,
        ctx: &CallContext,
        recurrence_ids: Vec<Uuid>,
    ) -> BoxStream<'static, StoreResult<OccurrenceException>>;

    async fn create(&self, ctx: &CallContext, exception: OccurrenceException) -> StoreResult<()>;

    async fn delete_by_recurrence_id(&self, ctx: &CallContext, recurrence_id: Uuid)
        -> StoreResult<()>;
}

#[async_trait]
pub trait OverrideStore: Send + Sync {
    fn get_by_recurrence_ids(
        &self,
        ctx: &CallContext,
        recurrence_ids: Vec<Uuid>,
    ) -> BoxStream<'static, StoreResult<OccurrenceOverride>>;

    /// Overrides of the given series whose `original_time` lies in
    /// `[start, end)` OR whose shifted `[start_time, end_time)` intersects it.
    fn get_in_range(
        &self,
        ctx: &CallContext,
        recurrence_ids: Vec<Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxStream<'static, StoreResult<OccurrenceOverride>>;

    async fn get_by_id(&self, ctx: &CallContext, id: Uuid) -> StoreResult<Option<OccurrenceOverride>>;

    async fn create(&self, ctx: &CallContext, override_: OccurrenceOverride) -> StoreResult<()>;

    async fn update(&self, ctx: &CallContext, override_: OccurrenceOverride) -> StoreResult<()>;

    async fn delete(&self, ctx: &CallContext, id: Uuid) -> StoreResult<()>;

    async fn delete_by_recurrence_id(&self, ctx: &CallContext, recurrence_id: Uuid)
        -> StoreResult<()>;
}
