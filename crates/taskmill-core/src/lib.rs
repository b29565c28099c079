//! `taskmill-core`: configuration, errors and the shared data model.

pub mod alert;
pub mod config;
pub mod error;
pub mod types;

pub use alert::{AlertLevel, AlertSink, MemorySink, TracingSink};
pub use config::TaskmillConfig;
pub use error::{CoreError, Result};
pub use types::{
    Frequency, InstanceStatus, NewInstance, QueuedTask, Schedule, ScheduleInstance, TaskOutcome,
    TaskStatus,
};
