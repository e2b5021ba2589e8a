//! In-process key-value backend.
//!
//! Same contract as the Redis backend, per-key expiry included, without the
//! server. Used by the test suite and for single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::store::traits::KvBackend;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Shared in-memory key-value map. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvBackend for MemoryKv {
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let expired = matches!(entries.get(key), Some(e) if e.expires_at <= now);
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + Duration::from_secs(u32::MAX as u64));
        self.entries
            .lock()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn info(&self) -> Result<String, StoreError> {
        Ok(format!("backend: memory\nlive_keys: {}", self.len().await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_get_round_trip() {
        let kv = MemoryKv::new();
        kv.set_ex("a", "1".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(kv.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_keys_vanish() {
        let kv = MemoryKv::new();
        kv.set_ex("a", "1".into(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(kv.get("a").await.unwrap(), None);
        assert!(kv.keys("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keys_filters_by_prefix() {
        let kv = MemoryKv::new();
        kv.set_ex("wm_task_1", "a".into(), Duration::from_secs(60))
            .await
            .unwrap();
        kv.set_ex("wm_task_2", "b".into(), Duration::from_secs(60))
            .await
            .unwrap();
        kv.set_ex("other", "c".into(), Duration::from_secs(60))
            .await
            .unwrap();

        let mut keys = kv.keys("wm_task_").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["wm_task_1", "wm_task_2"]);
    }

    #[tokio::test]
    async fn set_ex_replaces_value_and_expiry() {
        let kv = MemoryKv::new();
        kv.set_ex("a", "old".into(), Duration::from_millis(10))
            .await
            .unwrap();
        kv.set_ex("a", "new".into(), Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn delete_removes_keys() {
        let kv = MemoryKv::new();
        kv.set_ex("a", "1".into(), Duration::from_secs(60))
            .await
            .unwrap();
        kv.set_ex("b", "2".into(), Duration::from_secs(60))
            .await
            .unwrap();
        kv.delete(&["a".to_string(), "gone".to_string()])
            .await
            .unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
        assert_eq!(kv.get("b").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let kv = MemoryKv::new();
        let other = kv.clone();
        kv.set_ex("a", "1".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(other.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(other.len().await, 1);
    }
}
