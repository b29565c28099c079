//! `taskmill-scheduler`: instance generation, the schedule repository and
//! the job manager that claims and runs due instances.

pub mod error;
pub mod manager;
pub mod repository;
pub mod schedule;

pub use error::{Result, SchedulerError};
pub use manager::{CycleOutcome, JobManager, ManagerHandle, TEST_JOB_DELAY_SECS};
pub use repository::ScheduleRepository;
pub use schedule::{generate_instances_for_date, parse_time_of_day, InstanceWindow};
