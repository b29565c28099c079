use tracing::info;

use crate::job::{Job, JobKind, JobResult};

/// Smoke-test job: logs a line and succeeds.
#[derive(Debug, Default)]
pub struct TestJob;

impl JobKind for TestJob {
    const ID: &'static str = "TestJob";
}

impl Job for TestJob {
    fn id(&self) -> &str {
        Self::ID
    }

    fn execute(&mut self) -> Option<JobResult> {
        info!(job_id = Self::ID, "test job executing");
        Some(JobResult::succeeded("Test Complete"))
    }
}
