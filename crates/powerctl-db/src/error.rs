use std::fmt;

/// Store-level error taxonomy, with a hand-rolled `Display`/`Error` impl
/// rather than pulling in `thiserror` for three variants.
#[derive(Debug)]
pub enum StoreError {
    NotFound(String),
    Conflict(String),
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(s) => write!(f, "not found: {s}"),
            StoreError::Conflict(s) => write!(f, "conflict: {s}"),
            StoreError::Backend(s) => write!(f, "store backend error: {s}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}
