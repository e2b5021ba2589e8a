//! Workmill — process-pool job dispatcher over a shared key-value store.

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod pool;
pub mod registry;
pub mod schedule;
pub mod store;
pub mod task;
