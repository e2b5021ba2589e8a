//! Generic key-value task store.
//!
//! Implements the claim protocol over any [`KvBackend`]: scan keys in
//! descending order, skip records that are finished or still leased, write a
//! claim stamp, then read the record back to find out who won. There is no
//! store-side transaction; the re-read is the whole arbitration, which keeps
//! the backend requirements down to get/set/keys.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::traits::{KvBackend, TaskStore};
use crate::task::{DEFAULT_TIMEOUT_SECS, Params, Priority, Task};

/// Task store over a key-value backend with per-key expiry.
pub struct KvTaskStore<B> {
    backend: B,
    key_prefix: String,
    default_timeout: u64,
}

impl<B: KvBackend> KvTaskStore<B> {
    /// `key_prefix` namespaces every key this store touches. `default_timeout`
    /// (seconds) doubles as the lease for tasks without their own timeout and
    /// as the retention floor for stored records.
    pub fn new(backend: B, key_prefix: impl Into<String>, default_timeout: u64) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.into(),
            default_timeout: if default_timeout == 0 {
                DEFAULT_TIMEOUT_SECS
            } else {
                default_timeout
            },
        }
    }

    fn task_prefix(&self) -> String {
        format!("{}task_", self.key_prefix)
    }

    fn command_prefix(&self, name: &str) -> String {
        format!("{}command_{}_", self.key_prefix, name)
    }

    /// Retention for a stored record. Never shorter than the lease, or a
    /// lapsed claim would have nothing left to retry.
    fn retention(&self, task: &Task) -> Duration {
        Duration::from_secs(task.timeout.max(self.default_timeout))
    }

    fn decode(&self, key: &str, raw: &str) -> Option<Task> {
        match serde_json::from_str::<Task>(raw) {
            Ok(mut task) => {
                task.key = key.to_string();
                if task.timeout == 0 {
                    task.timeout = self.default_timeout;
                }
                Some(task)
            }
            Err(err) => {
                debug!(key = %key, error = %err, "Skipping undecodable task record");
                None
            }
        }
    }

    async fn write_record(&self, task: &Task) -> Result<(), StoreError> {
        let value =
            serde_json::to_string(task).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.backend
            .set_ex(&task.key, value, self.retention(task))
            .await
    }
}

#[async_trait]
impl<B: KvBackend> TaskStore for KvTaskStore<B> {
    async fn new_task_key(&self, priority: Priority) -> Result<String, StoreError> {
        Ok(format!(
            "{}task_{}_{}",
            self.key_prefix,
            priority.as_u8(),
            Uuid::new_v4().simple()
        ))
    }

    async fn put_task(&self, task: &Task) -> Result<(), StoreError> {
        self.write_record(task).await
    }

    async fn pop_task(&self) -> Result<Option<Task>, StoreError> {
        let mut keys = self.backend.keys(&self.task_prefix()).await?;
        keys.sort_unstable_by(|a, b| b.cmp(a));

        // One claim stamp per scan; the re-read below compares against it.
        let stamp = Utc::now();
        for key in keys {
            let Some(raw) = self.backend.get(&key).await? else {
                continue;
            };
            let Some(mut task) = self.decode(&key, &raw) else {
                continue;
            };
            if !task.claimable(stamp) {
                continue;
            }

            task.taken = Some(stamp);
            self.write_record(&task).await?;

            // Concurrent claimants all wrote their own stamp; whoever's
            // write landed last owns the task.
            let Some(raw) = self.backend.get(&key).await? else {
                continue;
            };
            let Some(reread) = self.decode(&key, &raw) else {
                continue;
            };
            if reread.taken == Some(stamp) {
                return Ok(Some(task));
            }
            debug!(key = %key, "Lost claim race, trying the next key");
        }
        Ok(None)
    }

    async fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        if self.backend.get(&task.key).await?.is_none() {
            error!(
                key = %task.key,
                "Update for a task record that no longer exists, dropping it"
            );
            return Ok(());
        }
        self.write_record(task).await
    }

    async fn set_manage_command(&self, name: &str, params: Params) -> Result<(), StoreError> {
        if name.is_empty() {
            return Err(StoreError::InvalidCommand {
                reason: "command name must not be empty".to_string(),
            });
        }
        if params.is_empty() {
            return Err(StoreError::InvalidCommand {
                reason: format!("{name} command needs non-empty params"),
            });
        }
        let key = format!("{}{}", self.command_prefix(name), Uuid::new_v4().simple());
        let value = serde_json::to_string(&params)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.backend
            .set_ex(&key, value, Duration::from_secs(self.default_timeout))
            .await
    }

    async fn select_manage_commands(
        &self,
        name: &str,
    ) -> Result<HashMap<String, Params>, StoreError> {
        if name.is_empty() {
            return Err(StoreError::InvalidCommand {
                reason: "command name must not be empty".to_string(),
            });
        }
        let keys = self.backend.keys(&self.command_prefix(name)).await?;
        let mut commands = HashMap::new();
        let mut consumed = Vec::new();
        for key in keys {
            let Some(raw) = self.backend.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<Params>(&raw) {
                Ok(params) => {
                    commands.insert(key.clone(), params);
                    consumed.push(key);
                }
                // Left behind on purpose; expiry reaps what we cannot read.
                Err(err) => debug!(key = %key, error = %err, "Skipping undecodable command"),
            }
        }
        if !consumed.is_empty() {
            self.backend.delete(&consumed).await?;
        }
        Ok(commands)
    }

    async fn info(&self) -> Result<String, StoreError> {
        self.backend.info().await
    }
}
