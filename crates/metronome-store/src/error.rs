use thiserror::Error;

/// Errors surfaced by a coordination-store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The backend cannot serve requests (poisoned state, lost connection).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
