//! HTTP client pool (spec §4.2), generalizing the teacher's
//! `WreqUpstreamClient` (`gproxy-core/src/upstream_client/mod.rs`) from one
//! client keyed by a single outbound-proxy string to one keyed by
//! `(group_id, proxy_chain)`, built lazily from each group's [`GroupConfig`].
//! `wreq`/`wreq-util` stay the HTTP client, same as the teacher.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use keyhub_common::GroupConfig;
use tokio::sync::RwLock;
use wreq::{Client, Proxy};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to build http client: {0}")]
    Build(String),
}

struct GroupClients {
    fingerprint: u64,
    standard: Client,
    /// Streaming variant disables the read timeout (spec §4.2).
    streaming: Client,
}

/// Per-group client cache, rebuilt lazily on the next request after a
/// group-config-changed event invalidates a slot. In-flight requests keep
/// using the `Client` handle they already acquired — replacing the cache
/// entry doesn't affect a clone already in another task's hands.
pub struct HttpClientPool {
    clients: RwLock<HashMap<i64, GroupClients>>,
}

impl Default for HttpClientPool {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClientPool {
    pub fn new() -> Self {
        Self { clients: RwLock::new(HashMap::new()) }
    }

    pub async fn standard(&self, group_id: i64, config: &GroupConfig) -> Result<Client, ClientError> {
        self.client_for(group_id, config, false).await
    }

    pub async fn streaming(&self, group_id: i64, config: &GroupConfig) -> Result<Client, ClientError> {
        self.client_for(group_id, config, true).await
    }

    async fn client_for(&self, group_id: i64, config: &GroupConfig, streaming: bool) -> Result<Client, ClientError> {
        let fingerprint = fingerprint(config);
        {
            let cached = self.clients.read().await;
            if let Some(entry) = cached.get(&group_id) {
                if entry.fingerprint == fingerprint {
                    return Ok(if streaming { entry.streaming.clone() } else { entry.standard.clone() });
                }
            }
        }
        let standard = build_client(config, false)?;
        let streaming_client = build_client(config, true)?;
        let mut cached = self.clients.write().await;
        cached.insert(
            group_id,
            GroupClients { fingerprint, standard: standard.clone(), streaming: streaming_client.clone() },
        );
        Ok(if streaming { streaming_client } else { standard })
    }

    /// Invalidates one group's cached clients (spec §4.2
    /// "group-config-changed event"), triggered from `keyhub-store` pub/sub.
    pub async fn invalidate(&self, group_id: i64) {
        self.clients.write().await.remove(&group_id);
    }

    /// Drops every cached client so idle connections close (spec §4.9
    /// graceful shutdown: "close idle HTTP clients").
    pub async fn close(&self) {
        self.clients.write().await.clear();
    }
}

fn fingerprint(config: &GroupConfig) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    config.request_timeout_secs.hash(&mut hasher);
    config.connect_timeout_secs.hash(&mut hasher);
    config.idle_conn_timeout_secs.hash(&mut hasher);
    config.response_header_timeout_secs.hash(&mut hasher);
    config.max_idle_conns.hash(&mut hasher);
    config.max_idle_conns_per_host.hash(&mut hasher);
    for hop in &config.proxy_chain {
        hop.url.hash(&mut hasher);
    }
    hasher.finish()
}

fn build_client(config: &GroupConfig, streaming: bool) -> Result<Client, ClientError> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .pool_idle_timeout(Duration::from_secs(config.idle_conn_timeout_secs))
        .pool_max_idle_per_host(config.max_idle_conns_per_host);

    builder = if streaming {
        // No read timeout: a slow-trickling SSE stream must not be killed by
        // an overall request deadline (spec §4.2, §4.8 "Streaming").
        builder
    } else {
        builder
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .read_timeout(Duration::from_secs(config.response_header_timeout_secs))
    };

    // `proxy_chain` is an ordered http/https/socks5 hop list (spec §6); wreq
    // takes one proxy per scheme, so only the first hop is wired here — a
    // true multi-hop chain needs a forward proxy of its own, out of scope
    // for the HTTP client pool itself.
    if let Some(hop) = config.proxy_chain.first() {
        builder = builder.proxy(Proxy::all(&hop.url).map_err(|e| ClientError::Build(e.to_string()))?);
    }

    builder.build().map_err(|e| ClientError::Build(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_config_reuses_cached_client() {
        let pool = HttpClientPool::new();
        let config = GroupConfig::default();
        let _ = pool.standard(1, &config).await.unwrap();
        let before = pool.clients.read().await.len();
        let _ = pool.standard(1, &config).await.unwrap();
        let after = pool.clients.read().await.len();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn invalidate_forces_rebuild() {
        let pool = HttpClientPool::new();
        let config = GroupConfig::default();
        let _ = pool.standard(1, &config).await.unwrap();
        pool.invalidate(1).await;
        assert!(pool.clients.read().await.get(&1).is_none());
    }
}
