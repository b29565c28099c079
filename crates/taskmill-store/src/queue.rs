//! A distributed queue of opaque string ids on top of [`TaskStore`].

use std::sync::Arc;

use taskmill_core::{config::validate_namespace, AlertSink, TaskOutcome, TracingSink};
use tracing::{debug, info};

use crate::{
    contract::TaskStore,
    error::{Result, StoreError},
};

/// One logical queue, identified by a short namespace.
///
/// Any number of `TaskQueue`s (in this process or others) may point at the
/// same namespace; each task is handed to exactly one `dequeue_task` caller.
pub struct TaskQueue {
    queue_id: String,
    claimant: String,
    store: Arc<dyn TaskStore>,
    alerts: Arc<dyn AlertSink>,
}

impl TaskQueue {
    /// `queue_id` must be 1..=10 non-blank characters.
    pub fn new(
        queue_id: impl Into<String>,
        claimant: impl Into<String>,
        store: Arc<dyn TaskStore>,
    ) -> Result<Self> {
        let queue_id = queue_id.into();
        validate_namespace(&queue_id).map_err(|_| StoreError::InvalidQueueId(queue_id.clone()))?;
        Ok(Self {
            queue_id,
            claimant: claimant.into(),
            store,
            alerts: Arc::new(TracingSink),
        })
    }

    /// Report to `alerts` instead of plain tracing.
    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn queue_id(&self) -> &str {
        &self.queue_id
    }

    pub fn claimant(&self) -> &str {
        &self.claimant
    }

    pub fn enqueue_task(&self, task_id: &str) -> Result<()> {
        let task_id = checked_task_id(task_id)?;
        self.store.enqueue_task(&self.queue_id, task_id)?;
        debug!(queue_id = %self.queue_id, %task_id, "task enqueued");
        Ok(())
    }

    /// Claim the next task. `Ok(None)` means the queue is empty, not that
    /// the claim failed.
    pub fn dequeue_task(&self) -> Result<Option<String>> {
        let task_id = self.store.claim_next_task(&self.queue_id, &self.claimant)?;
        if let Some(ref id) = task_id {
            info!(queue_id = %self.queue_id, task_id = %id, claimant = %self.claimant, "task claimed");
        }
        Ok(task_id)
    }

    /// `Ok(false)` if the task was not open (unknown or already done).
    pub fn complete_task(&self, task_id: &str) -> Result<bool> {
        let task_id = checked_task_id(task_id)?;
        self.store
            .complete_task(&self.queue_id, task_id, TaskOutcome::Succeeded)
    }

    /// Complete with a failure marker, so the task is never handed out again.
    pub fn remove_failed_task(&self, task_id: &str) -> Result<bool> {
        let task_id = checked_task_id(task_id)?;
        self.alerts.warning(&format!(
            "TaskQueue {}: removing failed task {task_id}",
            self.queue_id
        ));
        self.store
            .complete_task(&self.queue_id, task_id, TaskOutcome::Failed)
    }

    /// Tasks queued or in flight. Diagnostic only.
    pub fn queued_task_count(&self) -> Result<usize> {
        self.store.count_open_tasks(&self.queue_id)
    }

    /// Ids of tasks queued or in flight, oldest first. Diagnostic only.
    pub fn queued_task_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .list_open_tasks(&self.queue_id)?
            .into_iter()
            .map(|t| t.task_id)
            .collect())
    }
}

/// Task ids are stored exactly as given; only all-blank ids are refused.
fn checked_task_id(task_id: &str) -> Result<&str> {
    if task_id.trim().is_empty() {
        return Err(StoreError::InvalidTaskId(task_id.to_string()));
    }
    Ok(task_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteStore;
    use taskmill_core::{AlertLevel, MemorySink};

    fn queue(store: Arc<SqliteStore>, claimant: &str) -> TaskQueue {
        TaskQueue::new("JobQueue", claimant, store).unwrap()
    }

    #[test]
    fn rejects_bad_namespaces() {
        let store: Arc<dyn TaskStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        assert!(matches!(
            TaskQueue::new("", "me", store.clone()),
            Err(StoreError::InvalidQueueId(_))
        ));
        assert!(matches!(
            TaskQueue::new("much-too-long", "me", store),
            Err(StoreError::InvalidQueueId(_))
        ));
    }

    #[test]
    fn rejects_blank_task_ids() {
        let q = queue(Arc::new(SqliteStore::open_in_memory().unwrap()), "me");
        assert!(matches!(q.enqueue_task("  "), Err(StoreError::InvalidTaskId(_))));
        assert!(matches!(q.complete_task(""), Err(StoreError::InvalidTaskId(_))));
    }

    #[test]
    fn padded_task_ids_are_distinct() {
        let q = queue(Arc::new(SqliteStore::open_in_memory().unwrap()), "me");
        q.enqueue_task("a").unwrap();
        q.enqueue_task(" a").unwrap();
        assert_eq!(q.queued_task_count().unwrap(), 2);

        assert!(q.complete_task(" a").unwrap());
        let left = q.queued_task_ids().unwrap();
        assert_eq!(left, vec!["a".to_string()]);
    }

    #[test]
    fn enqueue_dequeue_complete() {
        let q = queue(Arc::new(SqliteStore::open_in_memory().unwrap()), "me");
        q.enqueue_task("task-1").unwrap();

        assert_eq!(q.dequeue_task().unwrap().as_deref(), Some("task-1"));
        // Nothing due is not a failure.
        assert_eq!(q.dequeue_task().unwrap(), None);
        assert!(q.complete_task("task-1").unwrap());
        assert_eq!(q.queued_task_count().unwrap(), 0);
    }

    #[test]
    fn diagnostics_list_open_tasks() {
        let q = queue(Arc::new(SqliteStore::open_in_memory().unwrap()), "me");
        q.enqueue_task("a").unwrap();
        q.enqueue_task("b").unwrap();
        q.dequeue_task().unwrap();

        assert_eq!(q.queued_task_count().unwrap(), 2);
        assert_eq!(q.queued_task_ids().unwrap(), vec!["a", "b"]);

        q.complete_task("a").unwrap();
        assert_eq!(q.queued_task_ids().unwrap(), vec!["b"]);
    }

    #[test]
    fn remove_failed_task_warns_and_completes() {
        let sink = Arc::new(MemorySink::new());
        let q = queue(Arc::new(SqliteStore::open_in_memory().unwrap()), "me")
            .with_alerts(sink.clone());
        q.enqueue_task("bad").unwrap();

        assert!(q.remove_failed_task("bad").unwrap());
        assert_eq!(sink.count(AlertLevel::Warning), 1);
        assert_eq!(q.dequeue_task().unwrap(), None);
    }

    #[test]
    fn queues_sharing_a_store_see_the_same_tasks() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let producer = queue(store.clone(), "producer");
        let consumer = queue(store, "consumer");

        producer.enqueue_task("shared").unwrap();
        assert_eq!(consumer.dequeue_task().unwrap().as_deref(), Some("shared"));
        assert_eq!(producer.dequeue_task().unwrap(), None);
    }
}
