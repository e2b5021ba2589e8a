//! Job registry: the allow-list boundary between stored task records and
//! executable code.
//!
//! A task record names its job as an opaque string. Only names registered
//! here at startup can ever run, whatever a producer writes into the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::task::Params;

/// Per-invocation context handed to a job.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Key of the task being executed.
    pub task_key: String,
    /// 1-based number of the worker slot running the job.
    pub worker: usize,
    /// Parameters from the task record, empty when the producer sent none.
    pub params: Params,
    /// Advisory runtime budget. The dispatcher never kills a running job;
    /// long-running jobs should watch this themselves.
    pub timeout: Duration,
}

/// One executable job.
#[async_trait]
pub trait Job: Send + Sync {
    /// Name task records use to reach this job.
    fn name(&self) -> &str;

    /// Run the job. The returned string, if any, becomes the stored result
    /// content.
    async fn run(&self, ctx: JobContext) -> anyhow::Result<Option<String>>;
}

/// Registry of runnable jobs, populated once at startup.
pub struct JobRegistry {
    jobs: HashMap<String, Arc<dyn Job>>,
}

impl JobRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
        }
    }

    /// Register a job under its own name. A job registered later under the
    /// same name replaces the earlier one.
    pub fn register(&mut self, job: Arc<dyn Job>) {
        let name = job.name().to_string();
        self.jobs.insert(name.clone(), job);
        tracing::debug!("Registered job: {}", name);
    }

    /// Get a job by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Job>> {
        self.jobs.get(name).cloned()
    }

    /// Check whether a name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    /// All registered job names.
    pub fn names(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
