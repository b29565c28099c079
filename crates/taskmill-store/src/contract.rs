//! The atomic operations a backing store must provide.
//!
//! Claims are the load-bearing part: `claim_next_*` must select, mark and
//! return a row in one store-side step. An implementation that reads an id
//! and then updates it in a second call lets two workers claim the same row.
//!
//! Every method distinguishes a failed call (`Err`) from an empty result
//! (`Ok(None)` / `Ok(false)` / empty `Vec`).

use chrono::{DateTime, Utc};
use taskmill_core::{
    InstanceStatus, NewInstance, QueuedTask, Schedule, ScheduleInstance, TaskOutcome,
};

use crate::error::Result;

/// Generic FIFO of opaque task ids, partitioned by queue namespace.
pub trait TaskStore: Send + Sync {
    /// Insert `task_id` as queued. A task that is already queued or processing
    /// is rejected with `AlreadyQueued`; a finished task is re-queued.
    fn enqueue_task(&self, queue_id: &str, task_id: &str) -> Result<()>;

    /// Atomically claim the oldest queued task for `claimant`.
    fn claim_next_task(&self, queue_id: &str, claimant: &str) -> Result<Option<String>>;

    /// Mark a queued or processing task done. `Ok(false)` if there was
    /// nothing open to complete (unknown id, or already done).
    fn complete_task(&self, queue_id: &str, task_id: &str, outcome: TaskOutcome) -> Result<bool>;

    /// Number of tasks not yet done. Diagnostic only.
    fn count_open_tasks(&self, queue_id: &str) -> Result<usize>;

    /// Tasks not yet done, oldest first. Diagnostic only.
    fn list_open_tasks(&self, queue_id: &str) -> Result<Vec<QueuedTask>>;
}

/// Schedules and their time-stamped instances.
pub trait InstanceStore: Send + Sync {
    fn insert_schedule(&self, schedule: &Schedule) -> Result<()>;

    /// `Ok(false)` when no schedule has that id.
    fn delete_schedule(&self, id: &str) -> Result<bool>;

    /// `Err(Corrupt)` when the stored row cannot be decoded.
    fn load_schedule(&self, id: &str) -> Result<Option<Schedule>>;

    /// All schedules, or only the active ones. Undecodable rows are
    /// reported and skipped.
    fn load_schedules(&self, active_only: bool) -> Result<Vec<Schedule>>;

    /// Persist a new queued instance and return its store-assigned id.
    /// Target times outside years 0000..=9999 are rejected.
    fn enqueue_instance(&self, instance: &NewInstance) -> Result<i64>;

    /// Persist every instance or none of them. Ids are returned in input order.
    fn enqueue_instances(&self, instances: &[NewInstance]) -> Result<Vec<i64>>;

    /// Atomically claim the earliest queued instance due at or before `now`.
    /// A claimed row that cannot be decoded is marked failed, not left claimed.
    fn claim_next_instance(
        &self,
        claimant: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleInstance>>;

    /// Move an open instance to a terminal `status`. `Ok(false)` if the
    /// instance does not exist or is already terminal.
    fn complete_instance(&self, instance_id: i64, status: InstanceStatus) -> Result<bool>;

    /// The next queued instance by target time, due or not. Never claims.
    fn peek_next_instance(&self) -> Result<Option<ScheduleInstance>>;

    /// Every instance with `start <= target_time < end`, in target order.
    fn instances_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ScheduleInstance>>;
}
