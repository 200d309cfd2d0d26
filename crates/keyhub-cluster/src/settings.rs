//! Settings-version propagation (spec §4.9 "Settings change" / "Cluster
//! coordination"): a copy-on-publish cache of `hub_settings`/
//! `system_settings`, rebuilt wholesale whenever any node bumps the shared
//! version counter and publishes on [`SETTINGS_VERSION_CHANNEL`].
//!
//! Mirrors the teacher's `AppState::providers` copy-on-publish pattern
//! (`gproxy-core/src/state/mod.rs`), generalized from a group registry to a
//! flat settings map and driven by `keyhub-store` pub/sub instead of an
//! in-process watch channel, since settings here must propagate across
//! nodes, not just across tasks in one process.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures_util::StreamExt;
use keyhub_db::{Storage, StorageSnapshot};
use keyhub_hub::{Hub, HubSettings, PriorityTable};
use keyhub_keypool::KeyProvider;
use keyhub_proxy::HttpClientPool;
use keyhub_store::KvStore;

pub const SETTINGS_VERSION_CHANNEL: &str = "keyhub:settings:version";
const SETTINGS_VERSION_KEY: &str = "keyhub:settings:version:counter";

#[derive(Default)]
struct SettingsState {
    raw: HashMap<String, serde_json::Value>,
    priorities: PriorityTable,
}

/// Read by the router on every request; never touches storage directly.
pub struct SettingsCache {
    state: ArcSwap<SettingsState>,
}

impl Default for SettingsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsCache {
    pub fn new() -> Self {
        Self { state: ArcSwap::from_pointee(SettingsState::default()) }
    }

    /// Wholesale rebuild from a fresh snapshot. `hub_settings` rows take
    /// precedence over `system_settings` rows with the same key, since
    /// `hub_settings` is the admin-editable table and `system_settings`
    /// also carries the bootstrap-only `global_config` blob.
    pub fn rebuild(&self, snapshot: &StorageSnapshot) {
        let mut raw = HashMap::new();
        for row in &snapshot.system_settings {
            raw.insert(row.key.clone(), row.value.clone());
        }
        for row in &snapshot.hub_settings {
            raw.insert(row.key.clone(), row.value.clone());
        }
        let priorities = snapshot
            .priorities
            .iter()
            .map(|row| ((row.model_name.clone(), row.group_id), row.priority))
            .collect();
        self.state.store(Arc::new(SettingsState { raw, priorities }));
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.state.load().raw.get(key).cloned()
    }

    /// Read by the router on every Hub-path request (spec §4.6 "Priority
    /// table"); rebuilt wholesale alongside the rest of the settings cache.
    pub fn priorities(&self) -> PriorityTable {
        self.state.load().priorities.clone()
    }

    /// The subset of settings the Hub selector reads (spec §4.6).
    pub fn hub_settings(&self) -> HubSettings {
        let state = self.state.load();
        HubSettings {
            health_threshold: state
                .raw
                .get("health_threshold")
                .and_then(|v| v.as_f64())
                .unwrap_or(keyhub_common::GlobalConfig::DEFAULT_HEALTH_THRESHOLD),
            enable_priority: state.raw.get("enable_priority").and_then(|v| v.as_bool()).unwrap_or(false),
            only_aggregate_groups: state.raw.get("only_aggregate_groups").and_then(|v| v.as_bool()).unwrap_or(false),
        }
    }
}

/// Called by admin mutation handlers (`keyhub-router`) after any write that
/// changes selection-affecting state. Every node, including the writer,
/// observes this and reloads — so the writer does not special-case its own
/// local cache.
pub async fn bump_settings_version(store: &dyn KvStore) -> keyhub_store::StoreResult<()> {
    let version = store.incr(SETTINGS_VERSION_KEY, 1).await?;
    store.publish(SETTINGS_VERSION_CHANNEL, &version.to_string()).await
}

/// Subscribes to [`SETTINGS_VERSION_CHANNEL`] and reloads every in-memory
/// cache from a fresh `load_snapshot` on each delivery. Delivery is
/// at-least-once (spec of `KvStore::subscribe`); a reload is idempotent, so
/// duplicate events are harmless.
pub fn spawn_settings_listener(
    store: Arc<dyn KvStore>,
    storage: Arc<dyn Storage>,
    hub: Arc<Hub>,
    keys: Arc<KeyProvider>,
    clients: Arc<HttpClientPool>,
    settings: Arc<SettingsCache>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = match store.subscribe(SETTINGS_VERSION_CHANNEL).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(error = %err, "failed to subscribe to settings version channel");
                return;
            }
        };
        while stream.next().await.is_some() {
            match storage.load_snapshot().await {
                Ok(snapshot) => {
                    hub.reload(&snapshot).await;
                    keys.reload(snapshot.api_keys.clone()).await;
                    settings.rebuild(&snapshot);
                    // Group-level client config (timeouts, proxy chain) may
                    // have changed; the pool rebuilds lazily from the fresh
                    // `GroupRuntime` on next use.
                    clients.close().await;
                }
                Err(err) => {
                    tracing::error!(error = %err, "settings reload failed to load snapshot");
                }
            }
        }
    })
}
