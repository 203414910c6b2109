use std::fmt;

use powerctl_db::StoreError;

/// Engine-level error taxonomy, translated by the daemon into HTTP status
/// classes: validation -> 400, not found -> 404, conflict -> 503.
#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    NotFound(String),
    Conflict(String),
    Store(String),
    NotStarted,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Validation(s) => write!(f, "validation error: {s}"),
            EngineError::NotFound(s) => write!(f, "not found: {s}"),
            EngineError::Conflict(s) => write!(f, "conflict: {s}"),
            EngineError::Store(s) => write!(f, "store error: {s}"),
            EngineError::NotStarted => write!(f, "engine has not been started"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(s) => EngineError::NotFound(s),
            StoreError::Conflict(s) => EngineError::Conflict(s),
            StoreError::Backend(s) => EngineError::Store(s),
        }
    }
}
