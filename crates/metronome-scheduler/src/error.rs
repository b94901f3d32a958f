use metronome_store::StoreError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Coordination-store failure. Fatal to the current operation; the
    /// caller's tick cadence is the retry mechanism.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A persisted schedule record could not be (de)serialized.
    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The provided recurrence policy is out of range.
    #[error("invalid recurrence: {0}")]
    InvalidRecurrence(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
