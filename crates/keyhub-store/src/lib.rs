//! Key-value and publish/subscribe abstraction shared by every node in a
//! cluster. A single-process deployment uses [`memory::MemoryStore`]; a
//! multi-node deployment points every node at the same [`redis::RedisStore`]
//! namespace via `REDIS_DSN`.
//!
//! Every operation carries a caller-supplied timeout. Consumers must tolerate
//! stale reads and idempotent re-delivery of pub/sub events — the store
//! guarantees that a leader's writes become visible to readers in finite
//! time, not linearizability.

pub mod memory;
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::Stream;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store operation timed out")]
    Timeout,
    #[error("backend error: {0}")]
    Backend(String),
    #[error("value at {0} was not valid UTF-8/JSON for the requested shape")]
    Malformed(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A single pub/sub delivery: the channel it arrived on and its raw payload.
pub type Message = (String, String);

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Sets `key` to `value` only if absent. Returns `true` if this call won
    /// the race and set the value — the basis for distributed locks.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool>;

    /// Atomically increments the integer at `key` (default 0) and returns the
    /// new value. Used for the key-rotation pointer and Dynamic Weight
    /// counters that must survive node churn.
    async fn incr(&self, key: &str, delta: i64) -> StoreResult<i64>;

    async fn list_push(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Returns every key under `prefix`. Backed by `SCAN` on Redis, not
    /// `KEYS`, to avoid blocking the server on a large namespace.
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()>;

    /// Subscribes to `channel`, returning a stream of `(channel, payload)`
    /// pairs. Delivery is at-least-once; handlers must be idempotent.
    async fn subscribe(
        &self,
        channel: &str,
    ) -> StoreResult<std::pin::Pin<Box<dyn Stream<Item = Message> + Send>>>;

    async fn close(&self) -> StoreResult<()>;
}

pub use memory::MemoryStore;
pub use redis_store::RedisStore;
