//! Public read/write surface.
//!
//! A query fetches series and standalone entries concurrently, then the
//! series' exceptions and overrides concurrently, then generates and resolves
//! one series at a time while the caller pulls from the returned stream.
//! Cancellation is checked between series and between instants; a cancelled
//! query simply ends its stream.

use std::sync::Arc;

use async_stream::try_stream;
use futures::stream::{BoxStream, Stream};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::civil;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::evaluator::{RRuleEvaluator, RuleEvaluator};
use crate::generator::Generators;
use crate::model::{
    CalendarEntry, Extensions, NewRecurrence, NewStandaloneOccurrence, RecurrenceDefinition, Scope,
    StandaloneOccurrence,
};
use crate::planner::{require_positive_duration, MutationPlanner};
use crate::resolver::SlotResolver;
use crate::rule::RecurrenceRule;
use crate::store::{
    collect_all, guarded, CallContext, ExceptionStore, OverrideStore, RangeQuery, RecurrenceStore,
    StandaloneStore,
};
use crate::window::TimeWindow;

/// The four storage collaborators.
#[derive(Clone)]
pub struct Stores {
    pub recurrences: Arc<dyn RecurrenceStore>,
    pub standalone: Arc<dyn StandaloneStore>,
    pub exceptions: Arc<dyn ExceptionStore>,
    pub overrides: Arc<dyn OverrideStore>,
}

impl Stores {
    /// Use one adapter for every port.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: RecurrenceStore + StandaloneStore + ExceptionStore + OverrideStore + 'static,
    {
        Self {
            recurrences: store.clone(),
            standalone: store.clone(),
            exceptions: store.clone(),
            overrides: store,
        }
    }
}

/// Stateless between calls; clones share the same collaborators.
#[derive(Clone)]
pub struct RecurrenceEngine {
    stores: Stores,
    evaluator: Arc<dyn RuleEvaluator>,
    generators: Generators,
    planner: MutationPlanner,
    config: EngineConfig,
}

pub type EntryStream = BoxStream<'static, Result<CalendarEntry>>;

impl RecurrenceEngine {
    /// # Errors
    /// Returns `EngineError::InvalidInput` if `config` is invalid.
    pub fn new(
        stores: Stores,
        evaluator: Arc<dyn RuleEvaluator>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let generators = Generators::new(evaluator.clone());
        let planner = MutationPlanner::new(
            stores.recurrences.clone(),
            stores.standalone.clone(),
            stores.exceptions.clone(),
            stores.overrides.clone(),
            generators.clone(),
        );
        Ok(Self {
            stores,
            evaluator,
            generators,
            planner,
            config,
        })
    }

    /// Engine over the `rrule`-backed evaluator.
    ///
    /// # Errors
    /// Returns `EngineError::InvalidInput` if `config` is invalid.
    pub fn with_config(stores: Stores, config: EngineConfig) -> Result<Self> {
        let evaluator = Arc::new(RRuleEvaluator::new(config.expansion_batch_size));
        Self::new(stores, evaluator, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Entries whose start lies in `window`: virtualized series instances
    /// first, recurrence by recurrence, then standalone entries.
    ///
    /// Entries moved into the window by an override follow their series'
    /// generated entries; the stream is not globally sorted.
    #[tracing::instrument(
        skip(self, ctx, scope, type_filter),
        fields(tenant_id = %scope.tenant_id, start = %window.start, end = %window.end)
    )]
    pub fn get_occurrences(
        &self,
        ctx: &CallContext,
        scope: Scope,
        window: TimeWindow,
        type_filter: Option<String>,
    ) -> EntryStream {
        Box::pin(occurrence_stream(
            self.clone(),
            ctx.clone(),
            scope,
            window,
            type_filter,
        ))
    }

    /// Like [`get_occurrences`](Self::get_occurrences), with bounds given as
    /// RFC 3339 text. Bounds without an explicit offset fail the stream
    /// before any storage call.
    pub fn get_occurrences_rfc3339(
        &self,
        ctx: &CallContext,
        scope: Scope,
        start: &str,
        end: &str,
        type_filter: Option<String>,
    ) -> EntryStream {
        match TimeWindow::parse(start, end) {
            Ok(window) => self.get_occurrences(ctx, scope, window, type_filter),
            Err(e) => Box::pin(futures::stream::once(async move { Err(e) })),
        }
    }

    /// Validate and persist a new series.
    #[tracing::instrument(skip(self, ctx, new), fields(tenant_id = %new.scope.tenant_id))]
    pub async fn create_recurrence(
        &self,
        ctx: &CallContext,
        new: NewRecurrence,
    ) -> Result<CalendarEntry> {
        let tz = civil::parse_timezone(&new.timezone)?;
        require_positive_duration(new.duration_minutes)?;
        if new.start_time > new.recurrence_end_time {
            return Err(EngineError::InvalidInput(format!(
                "start {} is after recurrence end {}",
                new.start_time.to_rfc3339(),
                new.recurrence_end_time.to_rfc3339()
            )));
        }
        let rule = RecurrenceRule::parse(&new.rule)?;
        if rule.until != new.recurrence_end_time {
            return Err(EngineError::InvalidRule(format!(
                "UNTIL {} does not match recurrence end {}",
                rule.until.to_rfc3339(),
                new.recurrence_end_time.to_rfc3339()
            )));
        }
        self.evaluator
            .validate(&rule, civil::to_civil(new.start_time, tz))?;

        let recurrence = RecurrenceDefinition {
            id: Uuid::new_v4(),
            scope: new.scope,
            entry_type: new.entry_type,
            rule: rule.to_string(),
            start_time: new.start_time,
            duration_minutes: new.duration_minutes,
            recurrence_end_time: new.recurrence_end_time,
            timezone: new.timezone,
            day_of_month_policy: new.day_of_month_policy,
            extensions: new.extensions,
        };
        guarded(ctx, self.stores.recurrences.create(ctx, recurrence.clone())).await?;
        debug!(recurrence_id = %recurrence.id, "recurrence created");
        Ok(CalendarEntry::from_pattern(&recurrence))
    }

    #[tracing::instrument(skip(self, ctx, new), fields(tenant_id = %new.scope.tenant_id))]
    pub async fn create_standalone_occurrence(
        &self,
        ctx: &CallContext,
        new: NewStandaloneOccurrence,
    ) -> Result<CalendarEntry> {
        civil::parse_timezone(&new.timezone)?;
        require_positive_duration(new.duration_minutes)?;

        let occurrence = StandaloneOccurrence {
            id: Uuid::new_v4(),
            scope: new.scope,
            entry_type: new.entry_type,
            start_time: new.start_time,
            duration_minutes: new.duration_minutes,
            timezone: new.timezone,
            extensions: new.extensions,
        };
        guarded(ctx, self.stores.standalone.create(ctx, occurrence.clone())).await?;
        debug!(occurrence_id = %occurrence.id, "standalone occurrence created");
        Ok(CalendarEntry::from_standalone(&occurrence))
    }

    #[tracing::instrument(skip(self, ctx, scope), fields(tenant_id = %scope.tenant_id))]
    pub async fn get_recurrence(
        &self,
        ctx: &CallContext,
        scope: &Scope,
        id: Uuid,
    ) -> Result<CalendarEntry> {
        self.load_recurrence(ctx, scope, id)
            .await
            .map(|r| CalendarEntry::from_pattern(&r))
    }

    /// Change the duration and extensions of a series. Every other pattern
    /// field is fixed at creation.
    #[tracing::instrument(skip(self, ctx, scope, extensions), fields(tenant_id = %scope.tenant_id))]
    pub async fn update_recurrence(
        &self,
        ctx: &CallContext,
        scope: &Scope,
        id: Uuid,
        duration_minutes: u32,
        extensions: Extensions,
    ) -> Result<CalendarEntry> {
        require_positive_duration(duration_minutes)?;
        let mut recurrence = self.load_recurrence(ctx, scope, id).await?;
        guarded(
            ctx,
            self.stores
                .recurrences
                .update(ctx, id, duration_minutes, extensions.clone()),
        )
        .await?;
        recurrence.duration_minutes = duration_minutes;
        recurrence.extensions = extensions;
        Ok(CalendarEntry::from_pattern(&recurrence))
    }

    #[tracing::instrument(skip(self, ctx, entry), fields(kind = ?entry.kind, recurrence_id = ?entry.recurrence_id))]
    pub async fn update_occurrence(
        &self,
        ctx: &CallContext,
        entry: &CalendarEntry,
    ) -> Result<CalendarEntry> {
        self.planner.update(ctx, entry).await
    }

    #[tracing::instrument(skip(self, ctx, entry), fields(kind = ?entry.kind, recurrence_id = ?entry.recurrence_id))]
    pub async fn delete_occurrence(&self, ctx: &CallContext, entry: &CalendarEntry) -> Result<()> {
        self.planner.delete(ctx, entry).await
    }

    #[tracing::instrument(skip(self, ctx, entry), fields(kind = ?entry.kind, recurrence_id = ?entry.recurrence_id))]
    pub async fn restore_occurrence(
        &self,
        ctx: &CallContext,
        entry: &CalendarEntry,
    ) -> Result<CalendarEntry> {
        self.planner.restore(ctx, entry).await
    }

    /// Delete a series with all its exceptions and overrides.
    #[tracing::instrument(skip(self, ctx, scope), fields(tenant_id = %scope.tenant_id))]
    pub async fn delete_recurrence(&self, ctx: &CallContext, scope: &Scope, id: Uuid) -> Result<()> {
        self.load_recurrence(ctx, scope, id).await?;
        guarded(ctx, self.stores.exceptions.delete_by_recurrence_id(ctx, id)).await?;
        guarded(ctx, self.stores.overrides.delete_by_recurrence_id(ctx, id)).await?;
        guarded(ctx, self.stores.recurrences.delete(ctx, id)).await?;
        debug!(recurrence_id = %id, "recurrence deleted");
        Ok(())
    }

    async fn load_recurrence(
        &self,
        ctx: &CallContext,
        scope: &Scope,
        id: Uuid,
    ) -> Result<RecurrenceDefinition> {
        guarded(ctx, self.stores.recurrences.get_by_id(ctx, scope, id))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("recurrence {}", id)))
    }
}

fn occurrence_stream(
    this: RecurrenceEngine,
    ctx: CallContext,
    scope: Scope,
    window: TimeWindow,
    type_filter: Option<String>,
) -> impl Stream<Item = Result<CalendarEntry>> + Send + 'static {
    try_stream! {
        if window.is_empty() {
            return;
        }
        let query = RangeQuery {
            scope,
            start: window.start,
            end: window.end,
            type_filter,
        };

        let fetched = futures::try_join!(
            collect_all(&ctx, this.stores.recurrences.get_in_range(&ctx, query.clone())),
            collect_all(&ctx, this.stores.standalone.get_in_range(&ctx, query.clone())),
        );
        let (recurrences, standalone) = match fetched {
            Ok(found) => found,
            Err(EngineError::Cancelled) => {
                debug!("query cancelled while fetching entries");
                return;
            }
            Err(e) => Err(e)?,
        };
        debug!(
            tenant_id = %query.scope.tenant_id,
            recurrences = recurrences.len(),
            standalone = standalone.len(),
            "fetched entries in range"
        );

        let (exceptions, overrides) = if recurrences.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            let ids: Vec<Uuid> = recurrences.iter().map(|r| r.id).collect();
            let fetched = futures::try_join!(
                collect_all(&ctx, this.stores.exceptions.get_by_recurrence_ids(&ctx, ids.clone())),
                collect_all(
                    &ctx,
                    this.stores.overrides.get_in_range(&ctx, ids, window.start, window.end)
                ),
            );
            match fetched {
                Ok(found) => found,
                Err(EngineError::Cancelled) => {
                    debug!("query cancelled while fetching exceptions and overrides");
                    return;
                }
                Err(e) => Err(e)?,
            }
        };

        for recurrence in recurrences {
            if ctx.is_cancelled() {
                return;
            }
            let recurrence_id = recurrence.id;
            let instants = this.generators.generate(&recurrence, window)?;
            let resolver = SlotResolver::new(recurrence, &exceptions, &overrides, window);

            let mut emitted = 0usize;
            let entries = resolver
                .resolve(instants)
                .with_cancellation(ctx.cancellation.clone());
            for entry in entries {
                if ctx.is_cancelled() {
                    return;
                }
                let entry = entry?;
                if this
                    .config
                    .max_instances_per_recurrence
                    .is_some_and(|cap| emitted >= cap)
                {
                    warn!(%recurrence_id, emitted, "instance cap reached; truncating recurrence");
                    break;
                }
                emitted += 1;
                yield entry;
            }
            debug!(%recurrence_id, emitted, "recurrence resolved");
        }

        for occurrence in standalone {
            if ctx.is_cancelled() {
                return;
            }
            if window.contains(occurrence.start_time) {
                yield CalendarEntry::from_standalone(&occurrence);
            }
        }
    }
}
