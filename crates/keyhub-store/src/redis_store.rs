//! Remote `KvStore`, used when `REDIS_DSN` selects a shared namespace for
//! all nodes in a cluster. Grounded in the `redis` dependency (`tokio-comp`,
//! `connection-manager`) carried by the nearest sibling example in this
//! domain (`smoelius-litellm-rs`), which the spec's "remote store" language
//! draws from.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio_stream::{Stream, StreamExt};

use crate::{KvStore, Message, StoreError, StoreResult};

pub struct RedisStore {
    client: redis::Client,
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn connect(dsn: &str) -> StoreResult<Self> {
        let client = redis::Client::open(dsn).map_err(|e| StoreError::Backend(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { client, conn })
    }

    fn conn(&self) -> redis::aio::ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.conn()
            .get(key)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn();
        match ttl {
            Some(d) => conn
                .set_ex(key, value, d.as_secs().max(1))
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            None => conn
                .set(key, value)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?,
        };
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.conn()
            .del(key)
            .await
            .map(|_: u64| ())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.conn()
            .exists(key)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(d) = ttl {
            cmd.arg("EX").arg(d.as_secs().max(1));
        }
        let reply: Option<String> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(reply.is_some())
    }

    async fn incr(&self, key: &str, delta: i64) -> StoreResult<i64> {
        self.conn()
            .incr(key, delta)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn list_push(&self, key: &str, value: &str) -> StoreResult<()> {
        self.conn()
            .rpush(key, value)
            .await
            .map(|_: i64| ())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut out = Vec::new();
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            out.extend(batch);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        Ok(out)
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        self.conn()
            .publish(channel, payload)
            .await
            .map(|_: i64| ())
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> StoreResult<Pin<Box<dyn Stream<Item = Message> + Send>>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let owned_channel = channel.to_string();
        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let payload: String = msg.get_payload().ok()?;
            Some((owned_channel.clone(), payload))
        });
        Ok(Box::pin(stream))
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}
