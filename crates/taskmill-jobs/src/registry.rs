use std::collections::HashMap;

use tracing::{debug, info};

use crate::{
    builtin::TestJob,
    error::{RegistryError, Result},
    job::{Job, JobKind},
};

type JobFactory = Box<dyn Fn() -> Box<dyn Job> + Send + Sync>;

/// Maps a job id to a factory producing a fresh job value.
///
/// Populated once at process start and then only read. New kinds of work
/// are added by registering another id; the orchestrator never changes.
#[derive(Default)]
pub struct JobRegistry {
    factories: HashMap<String, JobFactory>,
}

impl JobRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in job kinds.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        // Fresh map; the built-in ids cannot collide.
        let _ = registry.register_kind::<TestJob>();
        registry
    }

    /// Register `factory` under `id`. Registering an id twice is an error.
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Job> + Send + Sync + 'static,
    {
        let id = id.into();
        if id.trim().is_empty() || id.trim() != id {
            return Err(RegistryError::InvalidId(id));
        }
        if self.factories.contains_key(&id) {
            return Err(RegistryError::Duplicate { id });
        }
        info!(job_id = %id, "registering job kind");
        self.factories.insert(id, Box::new(factory));
        Ok(())
    }

    /// Register a [`JobKind`] under its own id.
    pub fn register_kind<J: JobKind>(&mut self) -> Result<()> {
        self.register(J::ID, || Box::new(J::default()) as Box<dyn Job>)
    }

    /// Build a fresh job for `id`.
    pub fn resolve(&self, id: &str) -> Result<Box<dyn Job>> {
        let key = id.trim();
        match self.factories.get(key) {
            Some(factory) => {
                debug!(job_id = %key, "job resolved");
                Ok(factory())
            }
            None => Err(RegistryError::NotFound { id: key.to_string() }),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id.trim())
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
