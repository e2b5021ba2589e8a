//! Configuration types.

use std::time::Duration;

use crate::task::{DEFAULT_TIMEOUT_SECS, Priority};

/// Control loop configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of worker slots in the pool.
    pub worker_count: usize,
    /// Pause between control loop iterations.
    pub step_delay: Duration,
    /// Priority assigned to tasks generated by the periodic evaluator.
    pub periodic_priority: Priority,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            step_delay: Duration::from_millis(500),
            periodic_priority: Priority::Normal,
        }
    }
}

impl DispatcherConfig {
    /// Build config from `WORKMILL_*` environment variables, falling back to
    /// the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let worker_count: usize = std::env::var("WORKMILL_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.worker_count);

        let step_delay = std::env::var("WORKMILL_STEP_DELAY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.step_delay);

        let periodic_priority: Priority = std::env::var("WORKMILL_PERIODIC_PRIORITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.periodic_priority);

        Self {
            worker_count,
            step_delay,
            periodic_priority,
        }
    }
}

/// Task store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Backend connection URL.
    pub url: String,
    /// Namespace prefix applied to every key this dispatcher touches.
    pub key_prefix: String,
    /// Fallback runtime budget in seconds for tasks without their own, and
    /// the retention floor for stored records.
    pub default_timeout: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "workmill_".to_string(),
            default_timeout: DEFAULT_TIMEOUT_SECS, // 24 hours
        }
    }
}

impl StoreConfig {
    /// Build config from `WORKMILL_*` environment variables, falling back to
    /// the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let url = std::env::var("WORKMILL_REDIS_URL").unwrap_or(defaults.url);
        let key_prefix = std::env::var("WORKMILL_KEY_PREFIX").unwrap_or(defaults.key_prefix);
        let default_timeout: u64 = std::env::var("WORKMILL_DEFAULT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.default_timeout);

        Self {
            url,
            key_prefix,
            default_timeout,
        }
    }
}
