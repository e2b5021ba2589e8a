//! Store contracts: the task-level interface the dispatcher works against,
//! and the key-value seam the generic claim algorithm runs on.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::task::{Params, Priority, Task};

/// Backend-agnostic task store.
///
/// Several dispatcher processes may share one store. Any of them may claim
/// any eligible task, so implementations must tolerate concurrent claims.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Allocate a fresh, collision-free task key. The key embeds the
    /// priority so that plain descending key order yields urgency order.
    async fn new_task_key(&self, priority: Priority) -> Result<String, StoreError>;

    /// Insert or overwrite a task record. Producer surface; the dispatcher
    /// itself never creates tasks through this.
    async fn put_task(&self, task: &Task) -> Result<(), StoreError>;

    /// Claim one eligible task: highest key first, skipping live claims and
    /// finished records. Returns `None` when nothing is claimable.
    async fn pop_task(&self) -> Result<Option<Task>, StoreError>;

    /// Persist the task's current fields under its key. Updating a record
    /// that no longer exists is a logged no-op, not an error.
    async fn update_task(&self, task: &Task) -> Result<(), StoreError>;

    /// Enqueue a manage command under `name`. Params must be non-empty.
    async fn set_manage_command(&self, name: &str, params: Params) -> Result<(), StoreError>;

    /// Drain all pending manage commands named `name`, keyed by command id.
    /// Commands are consumed: a second call returns nothing new.
    async fn select_manage_commands(&self, name: &str)
    -> Result<HashMap<String, Params>, StoreError>;

    /// Human-readable backend snapshot for startup logs. Not load-bearing.
    async fn info(&self) -> Result<String, StoreError>;
}

/// Minimal key-value surface the generic task store needs from a backend.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// All keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Value under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set `key` to `value`, replacing any previous value and expiry.
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Remove the given keys. Missing keys are not an error.
    async fn delete(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Backend diagnostics, one `key: value` pair per line.
    async fn info(&self) -> Result<String, StoreError>;
}
