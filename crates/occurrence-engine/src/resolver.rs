//! Applies exceptions and overrides to generated slots.
//!
//! A slot's state is rebuilt from the exception and override records every
//! time; nothing stores it. Exceptions win over overrides for the same slot.
//!
//! Visibility is decided on an entry's start: an entry is returned by the
//! window `[s, e)` that contains its `start_time`. An override moved out of
//! the window suppresses its slot there; one moved into the window from a slot
//! outside it is appended after the generated entries, in store order.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::error::Result;
use crate::generator::Instants;
use crate::model::{CalendarEntry, OccurrenceException, OccurrenceOverride, RecurrenceDefinition};
use crate::window::TimeWindow;

/// State of one `(recurrence, original_time)` slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotState {
    Generated,
    Overridden(OccurrenceOverride),
    /// Terminal.
    Excepted(OccurrenceException),
}

pub struct SlotResolver {
    recurrence: RecurrenceDefinition,
    exceptions: HashMap<DateTime<Utc>, OccurrenceException>,
    overrides: HashMap<DateTime<Utc>, OccurrenceOverride>,
    /// `original_time`s of `overrides`, in the order the store returned them.
    override_order: Vec<DateTime<Utc>>,
    window: TimeWindow,
}

impl SlotResolver {
    /// Records belonging to other recurrences are ignored. When a slot has
    /// several overrides the first one seen is kept.
    pub fn new<'a>(
        recurrence: RecurrenceDefinition,
        exceptions: impl IntoIterator<Item = &'a OccurrenceException>,
        overrides: impl IntoIterator<Item = &'a OccurrenceOverride>,
        window: TimeWindow,
    ) -> Self {
        let exceptions = exceptions
            .into_iter()
            .filter(|e| e.recurrence_id == recurrence.id)
            .map(|e| (e.original_time, e.clone()))
            .collect();

        let mut by_slot = HashMap::new();
        let mut override_order = Vec::new();
        for o in overrides.into_iter().filter(|o| o.recurrence_id == recurrence.id) {
            match by_slot.entry(o.original_time) {
                Entry::Vacant(slot) => {
                    slot.insert(o.clone());
                    override_order.push(o.original_time);
                }
                Entry::Occupied(_) => warn!(
                    recurrence_id = %recurrence.id,
                    override_id = %o.id,
                    original_time = %o.original_time,
                    "ignoring duplicate override for slot"
                ),
            }
        }

        Self {
            recurrence,
            exceptions,
            overrides: by_slot,
            override_order,
            window,
        }
    }

    pub fn recurrence(&self) -> &RecurrenceDefinition {
        &self.recurrence
    }

    pub fn state(&self, slot: DateTime<Utc>) -> SlotState {
        if let Some(exception) = self.exceptions.get(&slot) {
            return SlotState::Excepted(exception.clone());
        }
        match self.overrides.get(&slot) {
            Some(o) => SlotState::Overridden(o.clone()),
            None => SlotState::Generated,
        }
    }

    /// Visible entry for a generated slot, if any.
    pub fn resolve_slot(&self, slot: DateTime<Utc>) -> Option<CalendarEntry> {
        if self.exceptions.contains_key(&slot) {
            trace!(recurrence_id = %self.recurrence.id, %slot, "slot excepted");
            return None;
        }
        match self.overrides.get(&slot) {
            Some(o) if self.window.contains(o.start_time) => {
                Some(CalendarEntry::overridden(&self.recurrence, o))
            }
            Some(o) => {
                trace!(
                    recurrence_id = %self.recurrence.id,
                    %slot,
                    moved_to = %o.start_time,
                    "slot moved out of window"
                );
                None
            }
            None => Some(CalendarEntry::virtualized(&self.recurrence, slot)),
        }
    }

    /// Overrides whose slot lies outside the window but whose new start lies
    /// inside it.
    pub fn moved_into_window(&self) -> impl Iterator<Item = CalendarEntry> + '_ {
        self.override_order
            .iter()
            .filter_map(|slot| self.overrides.get(slot))
            .filter(|o| !self.window.contains(o.original_time))
            .filter(|o| !self.exceptions.contains_key(&o.original_time))
            .filter(|o| self.window.contains(o.start_time))
            .map(|o| CalendarEntry::overridden(&self.recurrence, o))
    }

    /// All visible entries of this recurrence: generated slots in ascending
    /// order, then those moved in from outside the window.
    pub fn resolve(self, instants: Instants) -> ResolvedEntries {
        ResolvedEntries {
            resolver: self,
            instants: Some(instants),
            moved: None,
            cancellation: None,
        }
    }
}

/// Lazy output of [`SlotResolver::resolve`].
pub struct ResolvedEntries {
    resolver: SlotResolver,
    instants: Option<Instants>,
    moved: Option<std::vec::IntoIter<CalendarEntry>>,
    cancellation: Option<CancellationToken>,
}

impl ResolvedEntries {
    /// Stop, without an error, once `token` is cancelled. Checked for every
    /// generated instant, including those that resolve to nothing.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

impl Iterator for ResolvedEntries {
    type Item = Result<CalendarEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_cancelled() {
            return None;
        }
        while let Some(instants) = self.instants.as_mut() {
            let slot = match instants.next() {
                Some(Ok(slot)) => slot,
                Some(Err(e)) => {
                    self.instants = None;
                    return Some(Err(e));
                }
                None => {
                    self.instants = None;
                    break;
                }
            };
            if let Some(entry) = self.resolver.resolve_slot(slot) {
                return Some(Ok(entry));
            }
            if self.is_cancelled() {
                return None;
            }
        }

        let resolver = &self.resolver;
        self.moved
            .get_or_insert_with(|| resolver.moved_into_window().collect::<Vec<_>>().into_iter())
            .next()
            .map(Ok)
    }
}
