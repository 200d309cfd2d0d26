//! Durable storage surface used by bootstrap and by admin mutations.
//! Runtime request handling never reads through here directly — it reads the
//! in-memory snapshots in `keyhub-hub`/`keyhub-keypool`, which are rebuilt
//! from `load_snapshot` and kept current via `keyhub-store` pub/sub.
//!
//! Generalizes the teacher's `Storage` trait (`gproxy-storage::storage`)
//! from credential/provider/user shapes to this spec's Group/Key/HubAccessKey
//! model, keeping the same "sync + load_snapshot + targeted mutation" split.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::entities::{
    api_keys, dynamic_weight_metrics, group_sub_groups, groups, hub_access_keys,
    hub_model_group_priorities, hub_settings, request_logs, system_settings,
};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("crypto error: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),
}

/// Everything a node needs to rebuild its read caches from scratch.
#[derive(Debug, Clone, Default)]
pub struct StorageSnapshot {
    pub groups: Vec<groups::Model>,
    pub group_sub_groups: Vec<group_sub_groups::Model>,
    pub api_keys: Vec<api_keys::Model>,
    pub hub_access_keys: Vec<hub_access_keys::Model>,
    pub priorities: Vec<hub_model_group_priorities::Model>,
    pub hub_settings: Vec<hub_settings::Model>,
    pub dynamic_weight_metrics: Vec<dynamic_weight_metrics::Model>,
    pub system_settings: Vec<system_settings::Model>,
}

#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub group_id: i64,
    /// Plaintext, encrypted here before the write and never stored as-is.
    pub plaintext: String,
}

#[derive(Debug, Clone)]
pub struct NewHubAccessKey {
    pub name: String,
    pub plaintext: String,
    pub allowed_models: Vec<String>,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Entity-first schema sync (SeaORM 2.0 `schema-sync`), run once by the leader.
    async fn sync(&self) -> StorageResult<()>;

    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot>;

    // Groups
    async fn upsert_group(&self, model: groups::Model) -> StorageResult<i64>;
    async fn delete_group(&self, id: i64) -> StorageResult<()>;
    async fn upsert_sub_group(&self, edge: group_sub_groups::Model) -> StorageResult<i64>;
    async fn remove_sub_group(&self, aggregate_id: i64, sub_group_id: i64) -> StorageResult<()>;

    // API keys
    async fn insert_api_key(&self, key: NewApiKey) -> StorageResult<i64>;
    async fn set_api_key_status(&self, id: i64, status: &str) -> StorageResult<()>;
    async fn record_api_key_failure(&self, id: i64, failure_count: i32) -> StorageResult<()>;
    async fn record_api_key_use(&self, id: i64, at: OffsetDateTime) -> StorageResult<()>;
    async fn delete_api_key(&self, id: i64) -> StorageResult<()>;
    /// Decrypts a stored key for use on an outbound request. Never exposed
    /// through an admin response — callers are request-path code only.
    fn decrypt_api_key(&self, key: &api_keys::Model) -> StorageResult<String>;

    // Hub access keys
    async fn insert_hub_access_key(&self, key: NewHubAccessKey) -> StorageResult<i64>;
    async fn set_hub_access_key_enabled(&self, id: i64, enabled: bool) -> StorageResult<()>;
    async fn record_hub_access_key_use(&self, id: i64, at: OffsetDateTime) -> StorageResult<()>;
    fn decrypt_hub_access_key(&self, key: &hub_access_keys::Model) -> StorageResult<String>;
    fn hash_candidate(&self, plaintext: &str) -> String;

    // Priorities
    async fn upsert_priority(&self, model_name: &str, group_id: i64, priority: i32) -> StorageResult<()>;

    // Dynamic Weight persistence
    async fn persist_weight_metrics(&self, rows: Vec<dynamic_weight_metrics::Model>) -> StorageResult<()>;
    async fn soft_delete_weight_metric(&self, aggregate_id: i64, sub_group_id: i64, at: OffsetDateTime) -> StorageResult<()>;

    // Settings
    async fn upsert_system_setting(&self, key: &str, value: serde_json::Value) -> StorageResult<()>;

    // Observability (spec §3 "request_logs / group_hourly_stats"), written by
    // background flush/rollup/cleanup workers only, never on the request path.
    async fn record_request_logs(&self, rows: Vec<request_logs::Model>) -> StorageResult<()>;
    /// Deletes `request_logs` rows older than `before`, returning the count removed.
    async fn prune_request_logs(&self, before: OffsetDateTime) -> StorageResult<u64>;
    async fn upsert_hourly_stat(&self, group_id: i64, hour: OffsetDateTime, requests: i64, failures: i64) -> StorageResult<()>;
}
