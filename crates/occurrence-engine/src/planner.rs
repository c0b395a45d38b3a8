//! Per-instance edits of a series: update, delete and restore one slot.
//!
//! | From        | Action  | To          | Writes                                        |
//! |-------------|---------|-------------|-----------------------------------------------|
//! | Generated   | update  | Overridden  | create override, snapshot pattern values       |
//! | Overridden  | update  | Overridden  | update override, keep the first snapshot       |
//! | Generated   | delete  | Excepted    | create exception at the slot                   |
//! | Overridden  | delete  | Excepted    | delete override, exception at its original time|
//! | Overridden  | restore | Generated   | delete override                                |
//!
//! Excepted is terminal. All checks run before the first write; the writes
//! of one mutation are not atomic unless the caller's [`CallContext`]
//! carries a transaction.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::civil;
use crate::error::{EngineError, Result};
use crate::generator::Generators;
use crate::model::{
    CalendarEntry, EntryKind, OccurrenceException, OccurrenceOverride, RecurrenceDefinition,
    StandaloneOccurrence,
};
use crate::resolver::{SlotResolver, SlotState};
use crate::store::{
    collect_all, guarded, CallContext, ExceptionStore, OverrideStore, RecurrenceStore,
    StandaloneStore,
};
use crate::window::TimeWindow;

#[derive(Clone)]
pub struct MutationPlanner {
    recurrences: Arc<dyn RecurrenceStore>,
    standalone: Arc<dyn StandaloneStore>,
    exceptions: Arc<dyn ExceptionStore>,
    overrides: Arc<dyn OverrideStore>,
    generators: Generators,
}

/// A virtualized slot with its parent series and reconstructed state.
struct LoadedSlot {
    recurrence: RecurrenceDefinition,
    original_time: DateTime<Utc>,
    state: SlotState,
}

fn invariant(message: impl Into<String>) -> EngineError {
    let message = message.into();
    warn!(%message, "rejected occurrence mutation");
    EngineError::InvariantViolation(message)
}

pub(crate) fn require_positive_duration(duration_minutes: u32) -> Result<()> {
    if duration_minutes == 0 {
        return Err(EngineError::InvalidInput(
            "duration must be positive".to_string(),
        ));
    }
    Ok(())
}

impl MutationPlanner {
    pub fn new(
        recurrences: Arc<dyn RecurrenceStore>,
        standalone: Arc<dyn StandaloneStore>,
        exceptions: Arc<dyn ExceptionStore>,
        overrides: Arc<dyn OverrideStore>,
        generators: Generators,
    ) -> Self {
        Self {
            recurrences,
            standalone,
            exceptions,
            overrides,
            generators,
        }
    }

    /// Apply the requested start, duration and extensions of `entry`.
    pub async fn update(&self, ctx: &CallContext, entry: &CalendarEntry) -> Result<CalendarEntry> {
        match entry.kind {
            EntryKind::Pattern => Err(invariant("patterns cannot be updated as an occurrence")),
            EntryKind::Standalone => self.update_standalone(ctx, entry).await,
            EntryKind::Virtualized => {
                require_positive_duration(entry.duration_minutes)?;
                let slot = self.load_slot(ctx, entry).await?;
                match slot.state {
                    SlotState::Generated => {
                        let override_ = OccurrenceOverride {
                            id: Uuid::new_v4(),
                            recurrence_id: slot.recurrence.id,
                            original_time: slot.original_time,
                            start_time: entry.start_time,
                            duration_minutes: entry.duration_minutes,
                            original_duration_minutes: slot.recurrence.duration_minutes,
                            original_extensions: slot.recurrence.extensions.clone(),
                            extensions: entry.extensions.clone(),
                        };
                        guarded(ctx, self.overrides.create(ctx, override_.clone())).await?;
                        debug!(override_id = %override_.id, "slot overridden");
                        Ok(CalendarEntry::overridden(&slot.recurrence, &override_))
                    }
                    SlotState::Overridden(mut override_) => {
                        override_.start_time = entry.start_time;
                        override_.duration_minutes = entry.duration_minutes;
                        override_.extensions = entry.extensions.clone();
                        guarded(ctx, self.overrides.update(ctx, override_.clone())).await?;
                        debug!(override_id = %override_.id, "override updated");
                        Ok(CalendarEntry::overridden(&slot.recurrence, &override_))
                    }
                    SlotState::Excepted(_) => Err(invariant(format!(
                        "occurrence at {} has been deleted",
                        slot.original_time.to_rfc3339()
                    ))),
                }
            }
        }
    }

    /// Cancel one occurrence, or delete a standalone entry.
    pub async fn delete(&self, ctx: &CallContext, entry: &CalendarEntry) -> Result<()> {
        match entry.kind {
            EntryKind::Pattern => Err(invariant(
                "patterns cannot be deleted as an occurrence; delete the recurrence",
            )),
            EntryKind::Standalone => {
                let existing = self.load_standalone(ctx, entry).await?;
                guarded(ctx, self.standalone.delete(ctx, existing.id)).await?;
                debug!(occurrence_id = %existing.id, "standalone occurrence deleted");
                Ok(())
            }
            EntryKind::Virtualized => {
                let slot = self.load_slot(ctx, entry).await?;
                let original_time = match slot.state {
                    SlotState::Generated => slot.original_time,
                    SlotState::Overridden(override_) => {
                        guarded(ctx, self.overrides.delete(ctx, override_.id)).await?;
                        override_.original_time
                    }
                    SlotState::Excepted(_) => {
                        return Err(EngineError::NotFound(format!(
                            "occurrence at {} has already been deleted",
                            slot.original_time.to_rfc3339()
                        )))
                    }
                };
                let exception = OccurrenceException {
                    id: Uuid::new_v4(),
                    recurrence_id: slot.recurrence.id,
                    original_time,
                };
                guarded(ctx, self.exceptions.create(ctx, exception.clone())).await?;
                debug!(exception_id = %exception.id, "slot excepted");
                Ok(())
            }
        }
    }

    /// Drop an override so the slot reverts to its generated values.
    pub async fn restore(&self, ctx: &CallContext, entry: &CalendarEntry) -> Result<CalendarEntry> {
        if entry.kind != EntryKind::Virtualized {
            return Err(invariant("only series occurrences can be restored"));
        }
        let slot = self.load_slot(ctx, entry).await?;
        match slot.state {
            SlotState::Overridden(override_) => {
                guarded(ctx, self.overrides.delete(ctx, override_.id)).await?;
                debug!(override_id = %override_.id, "override removed");
                Ok(CalendarEntry::virtualized(&slot.recurrence, override_.original_time))
            }
            SlotState::Generated => Err(invariant("occurrence has no override to restore")),
            SlotState::Excepted(_) => Err(invariant("deleted occurrences cannot be restored")),
        }
    }

    async fn load_standalone(
        &self,
        ctx: &CallContext,
        entry: &CalendarEntry,
    ) -> Result<StandaloneOccurrence> {
        let id = entry.occurrence_id.ok_or_else(|| {
            EngineError::InvalidInput("standalone entry has no occurrence id".to_string())
        })?;
        guarded(ctx, self.standalone.get_by_id(ctx, &entry.scope, id))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("standalone occurrence {}", id)))
    }

    async fn update_standalone(
        &self,
        ctx: &CallContext,
        entry: &CalendarEntry,
    ) -> Result<CalendarEntry> {
        require_positive_duration(entry.duration_minutes)?;
        civil::parse_timezone(&entry.timezone)?;
        let existing = self.load_standalone(ctx, entry).await?;

        let updated = StandaloneOccurrence {
            id: existing.id,
            scope: existing.scope,
            entry_type: entry.entry_type.clone(),
            start_time: entry.start_time,
            duration_minutes: entry.duration_minutes,
            timezone: entry.timezone.clone(),
            extensions: entry.extensions.clone(),
        };
        guarded(ctx, self.standalone.update(ctx, updated.clone())).await?;
        debug!(occurrence_id = %updated.id, "standalone occurrence updated");
        Ok(CalendarEntry::from_standalone(&updated))
    }

    /// Resolve the parent series and the slot's current state, rejecting
    /// changes to inherited fields and slots the series never produces.
    async fn load_slot(&self, ctx: &CallContext, entry: &CalendarEntry) -> Result<LoadedSlot> {
        let recurrence_id = entry.recurrence_id.ok_or_else(|| {
            EngineError::InvalidInput("occurrence has no recurrence id".to_string())
        })?;
        let original_time = entry.slot_time().ok_or_else(|| {
            EngineError::InvalidInput("occurrence has no original time".to_string())
        })?;

        let recurrence = guarded(ctx, self.recurrences.get_by_id(ctx, &entry.scope, recurrence_id))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("recurrence {}", recurrence_id)))?;

        if entry.entry_type != recurrence.entry_type {
            return Err(invariant("occurrence type is inherited from its recurrence"));
        }
        if entry.timezone != recurrence.timezone {
            return Err(invariant("occurrence timezone is inherited from its recurrence"));
        }

        let slot_window = TimeWindow::new(original_time, original_time + Duration::seconds(1))?;
        let generated = self
            .generators
            .generate(&recurrence, slot_window)?
            .next()
            .transpose()?;
        if generated != Some(original_time) {
            return Err(EngineError::NotFound(format!(
                "recurrence {} has no occurrence at {}",
                recurrence_id,
                original_time.to_rfc3339()
            )));
        }

        let ids = vec![recurrence_id];
        let (exceptions, overrides) = futures::try_join!(
            collect_all(ctx, self.exceptions.get_by_recurrence_ids(ctx, ids.clone())),
            collect_all(ctx, self.overrides.get_by_recurrence_ids(ctx, ids)),
        )?;
        let state = SlotResolver::new(recurrence.clone(), &exceptions, &overrides, slot_window)
            .state(original_time);

        if let Some(override_id) = entry.override_id {
            let stale = match &state {
                SlotState::Overridden(o) => o.id != override_id,
                SlotState::Generated => true,
                // Reported as a terminal-state violation by the caller.
                SlotState::Excepted(_) => false,
            };
            if stale {
                return Err(EngineError::NotFound(format!("override {}", override_id)));
            }
        }

        Ok(LoadedSlot {
            recurrence,
            original_time,
            state,
        })
    }
}
