//! Task store — the shared persistence layer work is claimed from.

pub mod kv;
pub mod memory;
pub mod redis_backend;
pub mod traits;

pub use kv::KvTaskStore;
pub use memory::MemoryKv;
pub use redis_backend::RedisKv;
pub use traits::{KvBackend, TaskStore};
