use chrono::{DateTime, Utc};
use taskmill_core::InstanceStatus;
use thiserror::Error;

/// Errors raised by a backing store. Any of these aborts the current
/// orchestration cycle; none of them means "nothing to claim".
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error, including lock-wait timeouts.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The task is already queued or being processed in this namespace.
    #[error("Task already queued: {queue_id}/{task_id}")]
    AlreadyQueued { queue_id: String, task_id: String },

    /// Queue namespaces are 1..=10 non-blank characters.
    #[error("Invalid queue id: {0:?}")]
    InvalidQueueId(String),

    #[error("Invalid task id: {0:?}")]
    InvalidTaskId(String),

    /// Only Completed or Failed may be written by a completion.
    #[error("Completion requires a terminal status, got {0}")]
    NonTerminalStatus(InstanceStatus),

    /// Target times are stored as four-digit-year RFC 3339 text.
    #[error("Target time out of range: {0}")]
    TargetTimeOutOfRange(DateTime<Utc>),

    /// A stored value could not be decoded.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// A previous holder of the connection panicked.
    #[error("Store connection poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;
