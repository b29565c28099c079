pub mod builtin;
pub mod error;
pub mod job;
pub mod registry;

pub use builtin::TestJob;
pub use error::{RegistryError, Result};
pub use job::{Job, JobKind, JobResult};
pub use registry::JobRegistry;
