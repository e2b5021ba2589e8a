//! Producer-side API.
//!
//! A [`JobClient`] submits tasks and operator commands into a task store;
//! dispatcher processes watching the same store pick them up from there. The
//! client never talks to a dispatcher directly.

use std::sync::Arc;

use tracing::info;

use crate::error::{ClientError, Result};
use crate::store::TaskStore;
use crate::task::{ManageCommand, Params, Priority, Task};

/// Knobs for a submitted task. The defaults mean "run as soon as a worker is
/// free, with the store's default timeout".
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Seconds the worker waits before executing the job.
    pub delay: f64,
    /// Lease seconds for this task; 0 falls back to the store default.
    pub timeout: u64,
    pub priority: Priority,
}

/// Producer handle over a shared task store.
pub struct JobClient {
    store: Arc<dyn TaskStore>,
}

impl JobClient {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Submit a task for `method`. Returns the store key of the new record,
    /// which doubles as the task id a caller can correlate results with.
    pub async fn submit(
        &self,
        method: &str,
        params: Option<Params>,
        options: SubmitOptions,
    ) -> Result<String> {
        if method.trim().is_empty() {
            return Err(ClientError::EmptyMethod.into());
        }
        let key = self.store.new_task_key(options.priority).await?;
        let mut task = Task::new(key.clone(), method)
            .with_priority(options.priority)
            .with_delay(options.delay)
            .with_timeout(options.timeout);
        if let Some(params) = params {
            task = task.with_params(params);
        }
        self.store.put_task(&task).await?;
        info!(key = %key, method = %method, priority = %options.priority, "Task submitted");
        Ok(key)
    }

    /// Queue a force-free command for worker `worker` (1-based). Every
    /// dispatcher on this store will free that slot on its next iteration.
    pub async fn free_worker(&self, worker: usize) -> Result<()> {
        if worker == 0 {
            return Err(ClientError::ZeroWorker.into());
        }
        let mut params = Params::new();
        params.insert("worker".to_string(), serde_json::json!(worker));
        self.store
            .set_manage_command(ManageCommand::FakeFreeWorker.as_str(), params)
            .await?;
        info!(worker, "Force-free command queued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KvTaskStore, MemoryKv};
    use crate::task::TaskKind;

    fn client() -> (JobClient, Arc<dyn TaskStore>) {
        let store: Arc<dyn TaskStore> = Arc::new(KvTaskStore::new(MemoryKv::new(), "wm_", 3600));
        (JobClient::new(Arc::clone(&store)), store)
    }

    #[tokio::test]
    async fn submitted_task_is_claimable() {
        let (client, store) = client();
        let mut params = Params::new();
        params.insert("path".into(), serde_json::json!("/tmp/report"));

        let key = client
            .submit("jobs.report", Some(params), SubmitOptions::default())
            .await
            .unwrap();

        let task = store.pop_task().await.unwrap().unwrap();
        assert_eq!(task.key, key);
        assert_eq!(task.method, "jobs.report");
        assert_eq!(task.kind, TaskKind::Adhoc);
        assert_eq!(
            task.params.unwrap().get("path").unwrap().as_str(),
            Some("/tmp/report")
        );
    }

    #[tokio::test]
    async fn options_flow_into_the_record() {
        let (client, store) = client();
        let key = client
            .submit(
                "jobs.report",
                None,
                SubmitOptions {
                    delay: 1.5,
                    timeout: 120,
                    priority: Priority::High,
                },
            )
            .await
            .unwrap();
        assert!(key.contains("_task_2_"), "priority digit in key: {key}");

        let task = store.pop_task().await.unwrap().unwrap();
        assert_eq!(task.delay, 1.5);
        assert_eq!(task.timeout, 120);
        assert_eq!(task.priority, Priority::High);
    }

    #[tokio::test]
    async fn blank_method_is_rejected() {
        let (client, _) = client();
        assert!(
            client
                .submit("", None, SubmitOptions::default())
                .await
                .is_err()
        );
        assert!(
            client
                .submit("   ", None, SubmitOptions::default())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn free_worker_queues_a_command() {
        let (client, store) = client();
        client.free_worker(3).await.unwrap();

        let commands = store.select_manage_commands("fakefree").await.unwrap();
        assert_eq!(commands.len(), 1);
        let params = commands.into_values().next().unwrap();
        assert_eq!(params.get("worker").unwrap().as_u64(), Some(3));
    }

    #[tokio::test]
    async fn free_worker_zero_is_rejected() {
        let (client, store) = client();
        assert!(client.free_worker(0).await.is_err());
        assert!(
            store
                .select_manage_commands("fakefree")
                .await
                .unwrap()
                .is_empty()
        );
    }
}
