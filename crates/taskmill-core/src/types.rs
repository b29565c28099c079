use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How often a [`Schedule`] produces an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    None,
    /// Created out-of-band, never regenerated.
    Once,
    Daily,
    /// Monday through Friday.
    WorkDays,
    WeeklyByDay,
    MonthlyByDate,
    Annual,
}

impl Frequency {
    /// Whether instance generation knows how to expand this frequency.
    pub fn is_implemented(self) -> bool {
        matches!(
            self,
            Frequency::None | Frequency::Once | Frequency::Daily | Frequency::WorkDays
        )
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Frequency::None => "none",
            Frequency::Once => "once",
            Frequency::Daily => "daily",
            Frequency::WorkDays => "work_days",
            Frequency::WeeklyByDay => "weekly_by_day",
            Frequency::MonthlyByDate => "monthly_by_date",
            Frequency::Annual => "annual",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Frequency {
    type Err = String;

    /// Accepts `work_days`, `workdays` and `WorkDays` alike.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match key.as_str() {
            "none" => Ok(Frequency::None),
            "once" => Ok(Frequency::Once),
            "daily" => Ok(Frequency::Daily),
            "workdays" => Ok(Frequency::WorkDays),
            "weeklybyday" => Ok(Frequency::WeeklyByDay),
            "monthlybydate" => Ok(Frequency::MonthlyByDate),
            "annual" => Ok(Frequency::Annual),
            _ => Err(format!("unknown frequency: {s}")),
        }
    }
}

/// A recurring definition of when a job should run.
///
/// Created and edited administratively; the job manager only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Opaque, stable primary key.
    pub id: String,
    /// Key into the job registry.
    pub job_id: String,
    pub frequency: Frequency,
    /// Offset from midnight, `[0.]hh:mm[:ss]`, under one day. Parsed at generation time.
    pub target_time_of_day: String,
    pub active: bool,
}

/// Lifecycle of a [`ScheduleInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Waiting for its target time.
    Queued,
    /// Claimed by exactly one worker.
    Processing,
    Completed,
    Failed,
}

impl InstanceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceStatus::Completed | InstanceStatus::Failed)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceStatus::Queued => "queued",
            InstanceStatus::Processing => "processing",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(InstanceStatus::Queued),
            "processing" => Ok(InstanceStatus::Processing),
            "completed" => Ok(InstanceStatus::Completed),
            "failed" => Ok(InstanceStatus::Failed),
            other => Err(format!("unknown instance status: {other}")),
        }
    }
}

/// An instance that has not been written to the store yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInstance {
    pub schedule_id: String,
    pub job_id: String,
    pub target_time: DateTime<Utc>,
}

impl NewInstance {
    /// An instance with no backing schedule; the job id doubles as schedule id.
    pub fn ad_hoc(job_id: impl Into<String>, target_time: DateTime<Utc>) -> Self {
        let job_id = job_id.into();
        Self {
            schedule_id: job_id.clone(),
            job_id,
            target_time,
        }
    }
}

/// One concrete, persisted occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleInstance {
    /// Store-assigned, monotonically increasing.
    pub instance_id: i64,
    pub schedule_id: String,
    pub job_id: String,
    pub target_time: DateTime<Utc>,
    pub status: InstanceStatus,
    /// Claimant identity; `None` until claimed.
    pub locked_by: Option<String>,
}

/// State of a [`QueuedTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    Done,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Done => "done",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "processing" => Ok(TaskStatus::Processing),
            "done" => Ok(TaskStatus::Done),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Terminal marker recorded when a task is completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded,
    Failed,
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskOutcome::Succeeded => write!(f, "succeeded"),
            TaskOutcome::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TaskOutcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(TaskOutcome::Succeeded),
            "failed" => Ok(TaskOutcome::Failed),
            other => Err(format!("unknown task outcome: {other}")),
        }
    }
}

/// A row of the generic task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTask {
    /// Queue namespace, at most 10 characters.
    pub queue_id: String,
    pub task_id: String,
    pub status: TaskStatus,
    pub outcome: Option<TaskOutcome>,
    pub locked_by: Option<String>,
}
