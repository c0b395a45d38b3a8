//! # occurrence-engine
//!
//! On-demand occurrence virtualization for recurring calendar entries.
//!
//! A series is stored once, as a bounded RFC 5545 rule with an IANA timezone.
//! Its instances are never materialized: every query expands the rule over the
//! requested window, applies the series' exceptions (cancelled instances) and
//! overrides (moved or edited instances), and streams the result together with
//! standalone entries. The inverse flows edit, cancel or restore one instance
//! without touching the series definition.
//!
//! ## Modules
//!
//! - [`engine`]: public read/write surface over the storage ports
//! - [`generator`]: recurrence + window → UTC instants (standard and clamped)
//! - [`evaluator`]: RFC 5545 expansion via the `rrule` crate
//! - [`resolver`]: exception/override precedence per slot
//! - [`planner`]: per-instance update/delete/restore transitions
//! - [`civil`]: civil time ↔ UTC with DST-lenient resolution
//! - [`store`]: storage ports and an in-memory adapter
//! - [`model`], [`rule`], [`window`], [`config`], [`error`]

pub mod civil;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod generator;
pub mod model;
pub mod planner;
pub mod resolver;
pub mod rule;
pub mod store;
pub mod window;

pub use config::EngineConfig;
pub use engine::{EntryStream, RecurrenceEngine, Stores};
pub use error::{EngineError, ErrorKind, StoreError};
pub use model::{
    CalendarEntry, DayOfMonthPolicy, EntryKind, Extensions, NewRecurrence,
    NewStandaloneOccurrence, OccurrenceException, OccurrenceOverride, OriginalSnapshot,
    RecurrenceDefinition, Scope, StandaloneOccurrence,
};
pub use store::{CallContext, TransactionId};
pub use window::TimeWindow;
