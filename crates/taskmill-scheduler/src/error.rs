use taskmill_store::StoreError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The backing store failed or timed out.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A schedule's time of day could not be parsed.
    #[error("Invalid time of day {value:?}: {reason}")]
    InvalidTimeOfDay { value: String, reason: String },

    /// The schedule definition is unusable for another reason.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Schedule not found: {id}")]
    ScheduleNotFound { id: String },

    /// The manager was asked to start with a rejected configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
