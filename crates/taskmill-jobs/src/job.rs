use serde::{Deserialize, Serialize};
use taskmill_core::InstanceStatus;

/// Outcome of one job execution. Consumed by instance completion, never
/// persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    /// Status written to the instance on completion.
    pub status: InstanceStatus,
    pub message: String,
}

impl JobResult {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            success: true,
            status: InstanceStatus::Completed,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            status: InstanceStatus::Failed,
            message: message.into(),
        }
    }

    /// The terminal status to record. A non-terminal `status` falls back to
    /// Completed or Failed according to `success`.
    pub fn outcome(&self) -> InstanceStatus {
        if self.status.is_terminal() {
            self.status
        } else if self.success {
            InstanceStatus::Completed
        } else {
            InstanceStatus::Failed
        }
    }
}

/// An executable job variant.
///
/// A fresh value is built from the registry for every execution, so
/// implementations must not rely on state surviving between runs.
pub trait Job: Send {
    /// Registry key of this variant.
    fn id(&self) -> &str;

    /// Run to completion. `None` means the job produced no result at all,
    /// which is reported differently from a failed result.
    fn execute(&mut self) -> Option<JobResult>;
}

/// A job variant with a fixed registry key and a default constructor.
pub trait JobKind: Job + Default + 'static {
    const ID: &'static str;
}
