//! Redis key-value backend.
//!
//! Only four commands carry the whole store contract: KEYS, GET, SETEX and
//! DEL. KEYS is O(n) over the keyspace, which is fine at the task volumes
//! this dispatcher targets; the namespace prefix keeps the scan narrow.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::error::StoreError;
use crate::store::traits::KvBackend;

/// Redis-backed [`KvBackend`] over a reconnecting connection manager.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    /// Connect to Redis at `url` (e.g. "redis://127.0.0.1:6379").
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        info!(url = %url, "Connected to Redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvBackend for RedisKv {
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("KEYS")
            .arg(format!("{prefix}*"))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(format!("KEYS failed: {e}")))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(format!("GET failed: {e}")))
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        // SETEX rejects a zero expiry, clamp up to one second.
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(format!("SETEX failed: {e}")))
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(keys)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(format!("DEL failed: {e}")))
    }

    async fn info(&self) -> Result<String, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("INFO")
            .arg("server")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(format!("INFO failed: {e}")))
    }
}
