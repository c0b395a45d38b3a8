//! Error types for occurrence-engine operations.

use thiserror::Error;

/// Failure reported by a storage adapter.
///
/// Adapters wrap whatever their backend raises; the engine passes it through
/// untouched and never retries.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct StoreError(#[from] anyhow::Error);

impl StoreError {
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self(anyhow::Error::msg(message))
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid RRULE: {0}")]
    InvalidRule(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Expansion error: {0}")]
    Expansion(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Coarse classification used by callers to map errors onto responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any collaborator I/O.
    Input,
    NotFound,
    /// Attempted transition or field change that the data model forbids.
    InvariantViolation,
    /// Storage or rule-evaluator failure, propagated unchanged.
    CollaboratorFailure,
    Cancelled,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidInput(_)
            | EngineError::InvalidRule(_)
            | EngineError::InvalidTimezone(_) => ErrorKind::Input,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            EngineError::Storage(_) | EngineError::Expansion(_) => ErrorKind::CollaboratorFailure,
            EngineError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
