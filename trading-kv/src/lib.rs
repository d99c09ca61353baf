mod memory;
mod pipeline;
mod redis_store;

pub use memory::InMemoryKvStore;
pub use pipeline::{PipelineBuilder, PipelineOp};
pub use redis_store::RedisKvStore;

use async_trait::async_trait;
use trading_core_types::CoreError;

/// Abstraction over the external KV server this core depends on for cross-agent
/// state, caching and pub/sub. Production traffic goes through `RedisKvStore`;
/// tests that don't need a live server use `InMemoryKvStore`.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CoreError>;

    async fn delete(&self, key: &str) -> Result<(), CoreError>;

    /// Keys matching a glob-style `pattern` (e.g. `agent:anomaly:alert:*`).
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CoreError>;

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, CoreError>;

    async fn hincrby_float(&self, key: &str, field: &str, delta: f64) -> Result<f64, CoreError>;

    /// Reads back a single hash field (e.g. the `cost` field the cost
    /// tracker's aggregate hashes accumulate via `hincrby_float`).
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CoreError>;

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), CoreError>;

    /// Pushes `value` onto the head of the list at `key`, then trims the list
    /// to its first `cap` entries (newest-first, matching the alert/history
    /// list semantics in the key table).
    async fn list_push_capped(&self, key: &str, value: &str, cap: usize) -> Result<(), CoreError>;

    async fn publish(&self, channel: &str, message: &str) -> Result<(), CoreError>;

    /// Subscribes to `channel`, returning a receiver fed by a background task
    /// for as long as the returned handle is alive.
    async fn subscribe(&self, channel: &str) -> Result<tokio::sync::mpsc::Receiver<String>, CoreError>;

    /// Runs every queued operation in `builder` as a single atomic round-trip.
    async fn execute_pipeline(&self, builder: PipelineBuilder) -> Result<(), CoreError>;
}
