use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use taskmill_core::{AlertSink, InstanceStatus, NewInstance, Schedule, ScheduleInstance};
use taskmill_store::InstanceStore;
use tracing::{debug, info, instrument};

use crate::{
    error::{Result, SchedulerError},
    schedule::{self, parse_time_of_day, InstanceWindow},
};

/// Schedules and the claim/complete lifecycle of their instances.
///
/// Holds no in-process lock over instances: every claim goes through the
/// store's atomic `claim_next_instance`, so any number of repositories in any
/// number of processes may share one store.
pub struct ScheduleRepository {
    store: Arc<dyn InstanceStore>,
    claimant: String,
    alerts: Arc<dyn AlertSink>,
}

impl ScheduleRepository {
    pub fn new(
        store: Arc<dyn InstanceStore>,
        claimant: impl Into<String>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            store,
            claimant: claimant.into(),
            alerts,
        }
    }

    /// Identity written to `locked_by` on every claim.
    pub fn claimant(&self) -> &str {
        &self.claimant
    }

    /// Active schedules. A failed load is an `Err`, never an empty list.
    pub fn get_schedules(&self) -> Result<Vec<Schedule>> {
        Ok(self.store.load_schedules(true)?)
    }

    /// Every schedule, active or not.
    pub fn get_all_schedules(&self) -> Result<Vec<Schedule>> {
        Ok(self.store.load_schedules(false)?)
    }

    pub fn get_schedule(&self, id: &str) -> Result<Schedule> {
        self.store
            .load_schedule(id)?
            .ok_or_else(|| SchedulerError::ScheduleNotFound { id: id.to_string() })
    }

    /// Validate and persist a schedule definition.
    #[instrument(skip(self, schedule), fields(schedule_id = %schedule.id))]
    pub fn add_schedule(&self, schedule: &Schedule) -> Result<()> {
        if schedule.id.trim().is_empty() {
            return Err(SchedulerError::InvalidSchedule("schedule id is blank".into()));
        }
        if schedule.job_id.trim().is_empty() {
            return Err(SchedulerError::InvalidSchedule(format!(
                "schedule {} has a blank job id",
                schedule.id
            )));
        }
        parse_time_of_day(&schedule.target_time_of_day)?;

        self.store.insert_schedule(schedule)?;
        info!(job_id = %schedule.job_id, frequency = %schedule.frequency, "schedule added");
        Ok(())
    }

    pub fn remove_schedule(&self, id: &str) -> Result<()> {
        if !self.store.delete_schedule(id)? {
            return Err(SchedulerError::ScheduleNotFound { id: id.to_string() });
        }
        info!(schedule_id = %id, "schedule removed");
        Ok(())
    }

    /// See [`schedule::generate_instances_for_date`].
    pub fn generate_instances_for_date(
        &self,
        date: NaiveDate,
        schedule: &Schedule,
    ) -> Result<Vec<NewInstance>> {
        schedule::generate_instances_for_date(date, schedule, self.alerts.as_ref())
    }

    /// Persist a queued instance and return its id.
    pub fn enqueue(&self, instance: &NewInstance) -> Result<i64> {
        let id = self.store.enqueue_instance(instance)?;
        debug!(
            instance_id = id,
            schedule_id = %instance.schedule_id,
            target_time = %instance.target_time,
            "instance enqueued"
        );
        Ok(id)
    }

    /// Persist a batch of queued instances in one transaction.
    pub fn enqueue_all(&self, instances: &[NewInstance]) -> Result<Vec<i64>> {
        let ids = self.store.enqueue_instances(instances)?;
        debug!(count = ids.len(), "instances enqueued");
        Ok(ids)
    }

    /// Claim the earliest instance due now. `Ok(None)` means nothing is due.
    pub fn dequeue(&self) -> Result<Option<ScheduleInstance>> {
        self.dequeue_at(Utc::now())
    }

    /// Claim the earliest instance due at or before `now`.
    pub fn dequeue_at(&self, now: DateTime<Utc>) -> Result<Option<ScheduleInstance>> {
        let claimed = self.store.claim_next_instance(&self.claimant, now)?;
        if let Some(ref instance) = claimed {
            info!(
                instance_id = instance.instance_id,
                job_id = %instance.job_id,
                claimant = %self.claimant,
                "instance claimed"
            );
        }
        Ok(claimed)
    }

    /// Record `instance.status` as the terminal state of the instance.
    ///
    /// `Ok(false)` if the instance was already terminal or is gone; the stored
    /// row is left untouched in that case.
    pub fn complete(&self, instance: &ScheduleInstance) -> Result<bool> {
        let done = self
            .store
            .complete_instance(instance.instance_id, instance.status)?;
        debug!(
            instance_id = instance.instance_id,
            status = %instance.status,
            done,
            "instance completion recorded"
        );
        Ok(done)
    }

    /// Administrative removal: a forced completion with `Failed`.
    pub fn remove_instance(&self, instance_id: i64) -> Result<bool> {
        self.alerts
            .warning(&format!("Removing schedule instance {instance_id}"));
        Ok(self
            .store
            .complete_instance(instance_id, InstanceStatus::Failed)?)
    }

    /// Target time of the next queued instance, due or not. Never claims.
    pub fn get_next_instance_time(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.store.peek_next_instance()?.map(|i| i.target_time))
    }

    /// Instances targeted inside `window`, in any status.
    ///
    /// A display snapshot only. It races with concurrent claims and must not
    /// drive execution; use [`dequeue`](Self::dequeue) for that.
    pub fn get_schedule_instances(&self, window: InstanceWindow) -> Result<Vec<ScheduleInstance>> {
        Ok(self.store.instances_between(window.start, window.end)?)
    }
}
