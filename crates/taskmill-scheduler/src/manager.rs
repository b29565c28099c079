use std::{any::Any, sync::Arc, time::Duration};

use chrono::{NaiveDate, Utc};
use taskmill_core::{config::ManagerConfig, AlertSink, NewInstance, ScheduleInstance};
use taskmill_jobs::{Job, JobKind, JobRegistry, JobResult, TestJob};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, instrument, warn};

use crate::{
    error::{Result, SchedulerError},
    repository::ScheduleRepository,
    schedule::InstanceWindow,
};

/// Delay before an ad hoc test instance becomes due.
pub const TEST_JOB_DELAY_SECS: i64 = 30;

/// What one orchestration cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing was due.
    Idle,
    /// The claim call itself failed; nothing was claimed.
    ClaimFailed,
    /// No job is registered under the instance's job id. Left claimed.
    UnknownJob { instance_id: i64, job_id: String },
    /// The job panicked. Left claimed.
    Panicked { instance_id: i64 },
    /// The job returned no result. Left claimed.
    MissingResult { instance_id: i64 },
    /// The job's outcome could not be recorded.
    CompleteFailed { instance_id: i64 },
    /// The outcome was recorded; `success` is the job's own verdict.
    Completed { instance_id: i64, success: bool },
}

/// How a job execution ended.
enum Execution {
    Finished(Option<JobResult>),
    Panicked(String),
}

/// The orchestrator: claims due instances one at a time and runs their jobs.
///
/// Construct one per process (or per test) and drive it either with
/// [`start`](Self::start) or by calling [`check_for_job`](Self::check_for_job)
/// directly.
pub struct JobManager {
    repository: ScheduleRepository,
    registry: Arc<JobRegistry>,
    alerts: Arc<dyn AlertSink>,
    config: ManagerConfig,
}

/// A running polling loop. Dropping the handle closes the shutdown channel,
/// so the loop exits after its current cycle; [`stop`](Self::stop) also waits
/// for that.
pub struct ManagerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ManagerHandle {
    /// Signal the loop and wait for it to exit. A job already executing runs
    /// to completion first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("job manager loop ended abnormally: {e}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl JobManager {
    pub fn new(
        repository: ScheduleRepository,
        registry: Arc<JobRegistry>,
        alerts: Arc<dyn AlertSink>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            repository,
            registry,
            alerts,
            config,
        }
    }

    pub fn repository(&self) -> &ScheduleRepository {
        &self.repository
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Startup checks. Problems are reported, never fatal.
    pub fn initialize(&self) {
        if self.registry.is_empty() {
            self.alerts.error("Job registry is empty: no job can be executed");
        } else {
            info!(jobs = ?self.registry.ids(), "job registry loaded");
        }

        match self.repository.get_schedules() {
            Ok(schedules) => {
                info!(count = schedules.len(), "active schedules loaded");
                for s in schedules.iter().filter(|s| !self.registry.contains(&s.job_id)) {
                    self.alerts.warning(&format!(
                        "Schedule {} refers to unregistered job {}",
                        s.id, s.job_id
                    ));
                }
            }
            Err(e) => self.alerts.error(&format!("Failed to load schedules: {e}")),
        }
    }

    /// Spawn the polling loop. The first cycle runs one interval after start.
    pub fn start(self: &Arc<Self>) -> Result<ManagerHandle> {
        self.config
            .validate()
            .map_err(|e| SchedulerError::Config(e.to_string()))?;

        let (shutdown, rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move { manager.run(rx).await });
        info!(
            interval_ms = self.config.update_interval_ms,
            claimant = %self.repository.claimant(),
            "job manager started"
        );
        Ok(ManagerHandle { shutdown, task })
    }

    /// Poll until `shutdown` flips to true or its sender is dropped.
    ///
    /// Cycles never overlap: a cycle that outlasts the interval delays the
    /// next tick rather than queueing a burst.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_millis(self.config.update_interval_ms);
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let outcome = self.check_for_job().await;
                    debug!(?outcome, "cycle finished");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("job manager shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run one cycle: claim at most one due instance and see it through.
    #[instrument(skip(self))]
    pub async fn check_for_job(&self) -> CycleOutcome {
        let mut instance = match self.repository.dequeue() {
            Ok(Some(instance)) => instance,
            Ok(None) => return CycleOutcome::Idle,
            Err(e) => {
                self.alerts
                    .error(&format!("Failed to claim next schedule instance: {e}"));
                return CycleOutcome::ClaimFailed;
            }
        };
        let instance_id = instance.instance_id;

        let job = match self.registry.resolve(&instance.job_id) {
            Ok(job) => job,
            Err(e) => {
                self.alerts.error(&format!(
                    "Instance {instance_id}: unknown job id {:?} ({e}); left claimed",
                    instance.job_id
                ));
                return CycleOutcome::UnknownJob {
                    instance_id,
                    job_id: instance.job_id,
                };
            }
        };

        let result = match execute_job(job).await {
            Execution::Finished(Some(result)) => result,
            Execution::Finished(None) => {
                self.alerts.error(&format!(
                    "Instance {instance_id}: job {} returned no result; left claimed",
                    instance.job_id
                ));
                return CycleOutcome::MissingResult { instance_id };
            }
            Execution::Panicked(message) => {
                self.alerts.error(&format!(
                    "Instance {instance_id}: job {} panicked: {message}; left claimed",
                    instance.job_id
                ));
                return CycleOutcome::Panicked { instance_id };
            }
        };

        if result.success {
            self.alerts.info(&format!(
                "Instance {instance_id}: job {} succeeded: {}",
                instance.job_id, result.message
            ));
        } else {
            self.alerts.error(&format!(
                "Instance {instance_id}: job {} failed: {}",
                instance.job_id, result.message
            ));
        }

        instance.status = result.outcome();
        self.record_completion(&instance, result.success)
    }

    fn record_completion(&self, instance: &ScheduleInstance, success: bool) -> CycleOutcome {
        let instance_id = instance.instance_id;
        match self.repository.complete(instance) {
            Ok(true) => CycleOutcome::Completed {
                instance_id,
                success,
            },
            Ok(false) => {
                self.alerts.error(&format!(
                    "Instance {instance_id}: completion as {} changed nothing (already terminal?)",
                    instance.status
                ));
                CycleOutcome::CompleteFailed { instance_id }
            }
            Err(e) => {
                self.alerts.error(&format!(
                    "Instance {instance_id}: failed to record completion: {e}"
                ));
                CycleOutcome::CompleteFailed { instance_id }
            }
        }
    }

    /// Generate and enqueue every active schedule's instances for `date`.
    ///
    /// Returns how many instances were enqueued. A schedule that fails to
    /// generate is reported and skipped. The day's instances are written in
    /// one transaction: a store failure is reported and nothing is enqueued.
    /// Not idempotent: call once per date.
    pub fn schedule_instances_for_date(&self, date: NaiveDate) -> Result<usize> {
        let schedules = self.repository.get_schedules()?;
        if schedules.is_empty() {
            self.alerts
                .warning(&format!("No active schedules to expand for {date}"));
            return Ok(0);
        }

        let mut pending = Vec::new();
        for schedule in &schedules {
            match self.repository.generate_instances_for_date(date, schedule) {
                Ok(instances) => pending.extend(instances),
                Err(e) => {
                    self.alerts
                        .error(&format!("Schedule {} skipped for {date}: {e}", schedule.id));
                }
            }
        }

        let enqueued = match self.repository.enqueue_all(&pending) {
            Ok(ids) => ids.len(),
            Err(e) => {
                self.alerts.error(&format!(
                    "Nothing scheduled for {date}: enqueueing {} instance(s) failed: {e}",
                    pending.len()
                ));
                return Err(e);
            }
        };

        self.alerts.status(&format!(
            "Scheduled {enqueued} instance(s) from {} schedule(s) for {date}",
            schedules.len()
        ));
        Ok(enqueued)
    }

    /// Enqueue a one-off [`TestJob`] run, due shortly.
    pub fn queue_test_job(&self) -> Result<i64> {
        let due = Utc::now() + chrono::Duration::seconds(TEST_JOB_DELAY_SECS);
        let id = self.repository.enqueue(&NewInstance::ad_hoc(TestJob::ID, due))?;
        self.alerts
            .info(&format!("Queued test job as instance {id}, due {due}"));
        Ok(id)
    }

    /// Display snapshot of instances in `window`. Never drives execution.
    pub fn query_instances(&self, window: InstanceWindow) -> Result<Vec<ScheduleInstance>> {
        self.repository.get_schedule_instances(window)
    }
}

/// Run `job` on the blocking pool. A panic is caught at the task boundary.
async fn execute_job(mut job: Box<dyn Job>) -> Execution {
    let job_id = job.id().to_string();
    debug!(%job_id, "executing job");
    match tokio::task::spawn_blocking(move || job.execute()).await {
        Ok(result) => Execution::Finished(result),
        Err(e) if e.is_panic() => Execution::Panicked(panic_message(e.into_panic())),
        Err(e) => Execution::Panicked(e.to_string()),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use taskmill_core::{AlertLevel, Frequency, InstanceStatus, MemorySink, Schedule};
    use taskmill_store::{InstanceStore, Result as StoreResult, SqliteStore, StoreError};

    #[derive(Default)]
    struct Failing;

    impl Job for Failing {
        fn id(&self) -> &str {
            "Failing"
        }

        fn execute(&mut self) -> Option<JobResult> {
            Some(JobResult::failed("disk full"))
        }
    }

    #[derive(Default)]
    struct Silent;

    impl Job for Silent {
        fn id(&self) -> &str {
            "Silent"
        }

        fn execute(&mut self) -> Option<JobResult> {
            None
        }
    }

    #[derive(Default)]
    struct Exploding;

    impl Job for Exploding {
        fn id(&self) -> &str {
            "Exploding"
        }

        fn execute(&mut self) -> Option<JobResult> {
            panic!("boom");
        }
    }

    impl JobKind for Failing {
        const ID: &'static str = "Failing";
    }
    impl JobKind for Silent {
        const ID: &'static str = "Silent";
    }
    impl JobKind for Exploding {
        const ID: &'static str = "Exploding";
    }

    /// Delegates to SQLite but refuses every batch enqueue.
    struct RejectingBatches(SqliteStore);

    impl InstanceStore for RejectingBatches {
        fn insert_schedule(&self, schedule: &Schedule) -> StoreResult<()> {
            self.0.insert_schedule(schedule)
        }
        fn delete_schedule(&self, id: &str) -> StoreResult<bool> {
            self.0.delete_schedule(id)
        }
        fn load_schedule(&self, id: &str) -> StoreResult<Option<Schedule>> {
            self.0.load_schedule(id)
        }
        fn load_schedules(&self, active_only: bool) -> StoreResult<Vec<Schedule>> {
            self.0.load_schedules(active_only)
        }
        fn enqueue_instance(&self, instance: &NewInstance) -> StoreResult<i64> {
            self.0.enqueue_instance(instance)
        }
        fn enqueue_instances(&self, _instances: &[NewInstance]) -> StoreResult<Vec<i64>> {
            Err(StoreError::Poisoned)
        }
        fn claim_next_instance(
            &self,
            claimant: &str,
            now: DateTime<Utc>,
        ) -> StoreResult<Option<ScheduleInstance>> {
            self.0.claim_next_instance(claimant, now)
        }
        fn complete_instance(&self, instance_id: i64, status: InstanceStatus) -> StoreResult<bool> {
            self.0.complete_instance(instance_id, status)
        }
        fn peek_next_instance(&self) -> StoreResult<Option<ScheduleInstance>> {
            self.0.peek_next_instance()
        }
        fn instances_between(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> StoreResult<Vec<ScheduleInstance>> {
            self.0.instances_between(start, end)
        }
    }

    fn daily(id: &str) -> Schedule {
        Schedule {
            id: id.into(),
            job_id: "TestJob".into(),
            frequency: Frequency::Daily,
            target_time_of_day: "08:00".into(),
            active: true,
        }
    }

    fn manager() -> (JobManager, Arc<MemorySink>) {
        manager_on(Arc::new(SqliteStore::open_in_memory().unwrap()))
    }

    fn manager_on(store: Arc<dyn InstanceStore>) -> (JobManager, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let repository = ScheduleRepository::new(store, "test-worker", sink.clone());

        let mut registry = JobRegistry::with_builtin();
        registry.register_kind::<Failing>().unwrap();
        registry.register_kind::<Silent>().unwrap();
        registry.register_kind::<Exploding>().unwrap();

        let manager = JobManager::new(
            repository,
            Arc::new(registry),
            sink.clone(),
            ManagerConfig::default(),
        );
        (manager, sink)
    }

    fn enqueue_due(manager: &JobManager, job_id: &str) -> i64 {
        let due = Utc::now() - chrono::Duration::seconds(1);
        manager
            .repository()
            .enqueue(&NewInstance::ad_hoc(job_id, due))
            .unwrap()
    }

    fn status_of(manager: &JobManager, instance_id: i64) -> InstanceStatus {
        let now = Utc::now();
        let around_now = InstanceWindow {
            start: now - chrono::Duration::hours(1),
            end: now + chrono::Duration::hours(1),
        };
        manager
            .query_instances(around_now)
            .unwrap()
            .into_iter()
            .find(|i| i.instance_id == instance_id)
            .map(|i| i.status)
            .unwrap()
    }

    #[tokio::test]
    async fn empty_store_is_idle_and_silent() {
        let (manager, sink) = manager();
        assert_eq!(manager.check_for_job().await, CycleOutcome::Idle);
        assert!(sink.alerts().is_empty());
    }

    #[tokio::test]
    async fn successful_job_completes_instance() {
        let (manager, sink) = manager();
        let id = enqueue_due(&manager, "TestJob");

        assert_eq!(
            manager.check_for_job().await,
            CycleOutcome::Completed {
                instance_id: id,
                success: true
            }
        );
        assert_eq!(status_of(&manager, id), InstanceStatus::Completed);
        assert_eq!(sink.count(AlertLevel::Error), 0);
    }

    #[tokio::test]
    async fn failed_result_is_reported_and_completed_as_failed() {
        let (manager, sink) = manager();
        let id = enqueue_due(&manager, "Failing");

        assert_eq!(
            manager.check_for_job().await,
            CycleOutcome::Completed {
                instance_id: id,
                success: false
            }
        );
        assert_eq!(status_of(&manager, id), InstanceStatus::Failed);
        assert_eq!(sink.count(AlertLevel::Error), 1);
    }

    #[tokio::test]
    async fn missing_result_leaves_instance_claimed() {
        let (manager, sink) = manager();
        let id = enqueue_due(&manager, "Silent");

        assert_eq!(
            manager.check_for_job().await,
            CycleOutcome::MissingResult { instance_id: id }
        );
        assert_eq!(status_of(&manager, id), InstanceStatus::Processing);
        assert_eq!(sink.count(AlertLevel::Error), 1);
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let (manager, sink) = manager();
        let id = enqueue_due(&manager, "Exploding");

        assert_eq!(
            manager.check_for_job().await,
            CycleOutcome::Panicked { instance_id: id }
        );
        assert_eq!(sink.count(AlertLevel::Error), 1);
        assert!(sink.messages(AlertLevel::Error)[0].contains("boom"));
        assert_eq!(status_of(&manager, id), InstanceStatus::Processing);
    }

    #[tokio::test]
    async fn one_instance_per_cycle() {
        let (manager, _) = manager();
        let first = enqueue_due(&manager, "TestJob");
        let second = enqueue_due(&manager, "TestJob");

        assert!(matches!(
            manager.check_for_job().await,
            CycleOutcome::Completed { instance_id, .. } if instance_id == first
        ));
        assert_eq!(status_of(&manager, second), InstanceStatus::Queued);
    }

    #[test]
    fn schedule_day_skips_broken_schedules() {
        let (manager, sink) = manager();
        let repo = manager.repository();
        repo.add_schedule(&Schedule {
            id: "daily".into(),
            job_id: "TestJob".into(),
            frequency: Frequency::Daily,
            target_time_of_day: "08:00".into(),
            active: true,
        })
        .unwrap();
        repo.add_schedule(&Schedule {
            id: "weekly".into(),
            job_id: "TestJob".into(),
            frequency: Frequency::WeeklyByDay,
            target_time_of_day: "08:00".into(),
            active: true,
        })
        .unwrap();

        let tuesday = NaiveDate::from_ymd_opt(2026, 10, 13).unwrap();
        assert_eq!(manager.schedule_instances_for_date(tuesday).unwrap(), 1);
        assert_eq!(sink.count(AlertLevel::Warning), 1);
        assert_eq!(
            manager
                .query_instances(InstanceWindow::for_date(tuesday))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn schedule_day_store_failure_enqueues_nothing_and_alerts() {
        let store = Arc::new(RejectingBatches(SqliteStore::open_in_memory().unwrap()));
        let (manager, sink) = manager_on(store);
        manager.repository().add_schedule(&daily("a")).unwrap();
        manager.repository().add_schedule(&daily("b")).unwrap();

        let tuesday = NaiveDate::from_ymd_opt(2026, 10, 13).unwrap();
        assert!(matches!(
            manager.schedule_instances_for_date(tuesday),
            Err(SchedulerError::Store(StoreError::Poisoned))
        ));
        assert!(manager
            .query_instances(InstanceWindow::for_date(tuesday))
            .unwrap()
            .is_empty());
        assert_eq!(sink.count(AlertLevel::Error), 1);
        assert!(sink.messages(AlertLevel::Error)[0].contains("Nothing scheduled"));
        assert_eq!(sink.count(AlertLevel::Status), 0);
    }

    #[test]
    fn schedule_day_enqueues_every_schedule() {
        let (manager, sink) = manager();
        manager.repository().add_schedule(&daily("a")).unwrap();
        manager.repository().add_schedule(&daily("b")).unwrap();

        let tuesday = NaiveDate::from_ymd_opt(2026, 10, 13).unwrap();
        assert_eq!(manager.schedule_instances_for_date(tuesday).unwrap(), 2);
        assert_eq!(sink.count(AlertLevel::Status), 1);
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_loop() {
        let (manager, _) = manager();
        let mut config = ManagerConfig::default();
        config.update_interval_ms = 60_000;
        let manager = Arc::new(JobManager { config, ..manager });

        let handle = manager.start().unwrap();
        let ManagerHandle { shutdown, task } = handle;
        drop(shutdown);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("loop should exit once the sender is gone")
            .unwrap();
    }

    #[test]
    fn schedule_day_without_schedules_warns() {
        let (manager, sink) = manager();
        let day = NaiveDate::from_ymd_opt(2026, 10, 13).unwrap();
        assert_eq!(manager.schedule_instances_for_date(day).unwrap(), 0);
        assert_eq!(sink.count(AlertLevel::Warning), 1);
    }

    #[test]
    fn test_job_is_queued_in_the_future() {
        let (manager, _) = manager();
        let before = Utc::now();
        manager.queue_test_job().unwrap();

        let next = manager.repository().get_next_instance_time().unwrap().unwrap();
        assert!(next >= before + chrono::Duration::seconds(TEST_JOB_DELAY_SECS - 1));
        assert!(manager.repository().dequeue().unwrap().is_none());
    }

    #[test]
    fn initialize_reports_empty_registry() {
        let sink = Arc::new(MemorySink::new());
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let manager = JobManager::new(
            ScheduleRepository::new(store, "w", sink.clone()),
            Arc::new(JobRegistry::new()),
            sink.clone(),
            ManagerConfig::default(),
        );
        manager.initialize();
        assert_eq!(sink.count(AlertLevel::Error), 1);
    }

    #[tokio::test]
    async fn start_rejects_interval_at_floor() {
        let (manager, _) = manager();
        let mut config = ManagerConfig::default();
        config.update_interval_ms = 1000;
        let manager = Arc::new(JobManager { config, ..manager });
        assert!(matches!(manager.start(), Err(SchedulerError::Config(_))));
    }
}
