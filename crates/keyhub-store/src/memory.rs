//! Single-process `KvStore`, used when no `REDIS_DSN` is configured. Mirrors
//! the teacher's in-process event bus (`gproxy-storage::bus::StorageBus`)
//! generalized from a typed batched writer into a general KV+pubsub surface:
//! a guarded map for storage, one `tokio::sync::broadcast` channel per topic
//! for pub/sub.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};

use crate::{KvStore, Message, StoreError, StoreResult};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.expires_at.map(|at| Instant::now() < at).unwrap_or(true)
    }
}

const TOPIC_CAPACITY: usize = 1024;

#[derive(Default)]
pub struct MemoryStore {
    map: RwLock<HashMap<String, Entry>>,
    topics: RwLock<HashMap<String, broadcast::Sender<Message>>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn get_or_create_topic(&self, channel: &str) -> broadcast::Sender<Message> {
        if let Some(tx) = self.topics.read().await.get(channel) {
            return tx.clone();
        }
        let mut topics = self.topics.write().await;
        topics
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let map = self.map.read().await;
        Ok(map.get(key).filter(|e| e.is_live()).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut map = self.map.write().await;
        map.insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: ttl.map(|d| Instant::now() + d) },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.map.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.map.read().await.get(key).map(|e| e.is_live()).unwrap_or(false))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool> {
        let mut map = self.map.write().await;
        if map.get(key).map(|e| e.is_live()).unwrap_or(false) {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: ttl.map(|d| Instant::now() + d) },
        );
        Ok(true)
    }

    async fn incr(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let mut map = self.map.write().await;
        let current = map
            .get(key)
            .filter(|e| e.is_live())
            .map(|e| e.value.parse::<i64>())
            .transpose()
            .map_err(|_| StoreError::Malformed(key.to_string()))?
            .unwrap_or(0);
        let next = current + delta;
        map.insert(key.to_string(), Entry { value: next.to_string(), expires_at: None });
        Ok(next)
    }

    async fn list_push(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut map = self.map.write().await;
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry { value: String::new(), expires_at: None });
        if entry.value.is_empty() {
            entry.value = value.to_string();
        } else {
            entry.value.push('\n');
            entry.value.push_str(value);
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let map = self.map.read().await;
        Ok(map
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live())
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        let tx = self.get_or_create_topic(channel).await;
        // No subscribers is not an error — pub/sub delivery is best-effort.
        let _ = tx.send((channel.to_string(), payload.to_string()));
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> StoreResult<Pin<Box<dyn Stream<Item = Message> + Send>>> {
        let tx = self.get_or_create_topic(channel).await;
        let stream = BroadcastStream::new(tx.subscribe()).filter_map(|r| r.ok());
        Ok(Box::pin(stream))
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn ttl_expiry_hides_value() {
        let store = MemoryStore::new();
        store.set("k", "v", Some(Duration::from_millis(5))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_if_absent_only_wins_once() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("lock", "a", None).await.unwrap());
        assert!(!store.set_if_absent("lock", "b", None).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test]
    async fn incr_is_additive_and_monotonic() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("rot:g1", 1).await.unwrap(), 1);
        assert_eq!(store.incr("rot:g1", 1).await.unwrap(), 2);
        assert_eq!(store.incr("rot:g1", 3).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn scan_prefix_only_returns_matching_live_keys() {
        let store = MemoryStore::new();
        store.set("group:1", "a", None).await.unwrap();
        store.set("group:2", "b", None).await.unwrap();
        store.set("other:1", "c", None).await.unwrap();
        let mut keys = store.scan_prefix("group:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["group:1".to_string(), "group:2".to_string()]);
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let store = MemoryStore::new();
        let mut stream = store.subscribe("settings").await.unwrap();
        store.publish("settings", "v=3").await.unwrap();
        let (channel, payload) = stream.next().await.unwrap();
        assert_eq!(channel, "settings");
        assert_eq!(payload, "v=3");
    }
}
