use std::fmt::Display;

use docperm_storage::{InvalidPrincipal, StoreError};
use thiserror::Error;

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Store(StoreError),
}

impl EngineError {
    /// Error mapper for lookups: a missing row becomes `NotFound(what)`.
    pub(crate) fn lookup(what: impl Display) -> impl FnOnce(StoreError) -> EngineError {
        move |e| match e {
            StoreError::NotFound => EngineError::NotFound(what.to_string()),
            other => other.into(),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => EngineError::NotFound("record not found".to_string()),
            StoreError::Conflict => EngineError::Conflict("concurrent update".to_string()),
            StoreError::AlreadyExists => EngineError::Conflict("record already exists".to_string()),
            other => EngineError::Store(other),
        }
    }
}

impl From<InvalidPrincipal> for EngineError {
    fn from(e: InvalidPrincipal) -> Self {
        EngineError::InvalidArgument(e.to_string())
    }
}
