//! Node bootstrap (spec §4.9 "On startup the node reads `IS_MASTER`"),
//! generalizing the teacher's `bootstrap_from_env`/`bootstrap`
//! (`gproxy-core/src/bootstrap/mod.rs`): CLI/ENV/DB merge, schema sync, and
//! default-admin-key bootstrap, onto this spec's leader/slave split and
//! Group/Hub/KeyProvider wiring instead of the teacher's provider registry.
//!
//! `encryption_key` is a deliberate divergence from the teacher's merge: it
//! is never round-tripped through the DB (unlike `auth_key_hash`, which is
//! already one-way hashed, the encryption key itself would sit in plaintext
//! in the very table it's meant to protect), so it must be supplied by
//! CLI/ENV on every start.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use keyhub_common::{parse_encryption_key, EncryptionKey, GlobalConfig, GlobalConfigPatch};
use keyhub_db::{SeaStorage, Storage, StorageSnapshot};
use keyhub_hub::Hub;
use keyhub_keypool::{KeyProvider, RestoreWorker};
use keyhub_proxy::{HttpClientPool, Pipeline, UpstreamKeyValidator};
use keyhub_store::{KvStore, MemoryStore, RedisStore};
use sea_orm::DatabaseConnection;

use crate::settings::SettingsCache;
use crate::workers::{spawn_observability, ObservabilityConfig, RequestLogReporter};

/// Blacklist threshold used by [`KeyProvider`] until a group-specific value
/// is threaded through (spec §6 config is per-group; the provider's counter
/// is process-wide, matching its current constructor shape).
const DEFAULT_BLACKLIST_THRESHOLD: i32 = 3;
const KEY_RESTORE_INTERVAL: Duration = Duration::from_secs(600);
const KEY_RESTORE_CONCURRENCY: usize = 4;
const WEIGHT_PERSISTENCE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Parser)]
#[command(name = "keyhub", version, about = "A multi-tenant reverse proxy for LLM provider APIs")]
pub struct CliArgs {
    /// Whether this node is the cluster leader (spec §4.9).
    #[arg(long, env = "IS_MASTER")]
    pub is_master: Option<String>,

    /// Relational database DSN.
    #[arg(long, env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// Optional remote KV store DSN; unset selects the in-memory store.
    #[arg(long, env = "REDIS_DSN")]
    pub redis_dsn: Option<String>,

    /// 32 raw bytes or 64 hex characters.
    #[arg(long, env = "ENCRYPTION_KEY")]
    pub encryption_key: Option<String>,

    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    #[arg(long, env = "PORT")]
    pub port: Option<String>,

    /// Hub access auth key (plaintext). Hashed before storage or comparison.
    #[arg(long, env = "AUTH_KEY")]
    pub auth_key: Option<String>,

    #[arg(long, env = "GRACEFUL_SHUTDOWN_TIMEOUT")]
    pub graceful_shutdown_timeout: Option<String>,
}

/// Everything a served request or a background worker needs, wired once at
/// startup (spec §4.9) and handed to `keyhub-router`/`apps/keyhub`.
pub struct Node {
    pub config: GlobalConfig,
    pub storage: Arc<dyn Storage>,
    pub store: Arc<dyn KvStore>,
    pub hub: Arc<Hub>,
    pub keys: Arc<KeyProvider>,
    pub clients: Arc<HttpClientPool>,
    pub pipeline: Arc<Pipeline>,
    pub settings: Arc<SettingsCache>,
    pub request_log_reporter: Arc<RequestLogReporter>,
    /// Kept open for [`crate::shutdown::close_database`]; `SeaStorage` owns
    /// its own clone for request-path use.
    pub db: DatabaseConnection,
    pub background: Vec<tokio::task::JoinHandle<()>>,
}

pub async fn bootstrap_from_env() -> anyhow::Result<Node> {
    let args = CliArgs::parse();
    bootstrap(args).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Node> {
    let is_master = parse_bool_env_value(args.is_master.clone(), "IS_MASTER")?.unwrap_or(false);
    let dsn = sanitize_dsn_value(args.database_dsn.clone());
    ensure_sqlite_parent_dir(&dsn)?;

    let encryption_key_raw = sanitize_optional_env_value(args.encryption_key.clone())
        .context("ENCRYPTION_KEY is required (32 raw bytes or 64 hex characters)")?;
    let encryption_key = parse_encryption_key(&encryption_key_raw).context("parse ENCRYPTION_KEY")?;

    let db = sea_orm::Database::connect(&dsn).await.context("connect database")?;
    let db_for_shutdown = db.clone();
    let storage: Arc<dyn Storage> = Arc::new(SeaStorage::new(db, EncryptionKey::from_bytes(encryption_key)));

    if is_master {
        storage.sync().await.context("schema sync")?;
    }

    let snapshot = storage.load_snapshot().await.context("load snapshot")?;
    let mut merged = snapshot
        .system_settings
        .iter()
        .find(|row| row.key == "global_config")
        .map(|row| patch_from_json(&row.value))
        .unwrap_or_default();

    let auth_key_hash = resolve_auth_key_hash(&args, &storage, is_master, merged.auth_key_hash.clone())?;

    let cli_patch = GlobalConfigPatch {
        is_master: Some(is_master),
        host: sanitize_optional_env_value(args.host.clone()),
        port: parse_u16_env_value(args.port.clone(), "PORT")?,
        database_dsn: Some(dsn.clone()),
        redis_dsn: sanitize_optional_env_value(args.redis_dsn.clone()),
        encryption_key: Some(encryption_key),
        auth_key_hash,
        graceful_shutdown_timeout_secs: parse_u64_env_value(args.graceful_shutdown_timeout.clone(), "GRACEFUL_SHUTDOWN_TIMEOUT")?,
        health_threshold: None,
    };
    merged.overlay(cli_patch);
    let config: GlobalConfig = merged.into_config().context("finalize merged global config")?;

    if is_master {
        storage.upsert_system_setting("global_config", config_to_json(&config)).await.context("persist global_config")?;
    }

    let store: Arc<dyn KvStore> = build_store(&config).await?;
    if is_master {
        clear_shared_store(store.as_ref()).await;
    }

    let settings = Arc::new(SettingsCache::new());
    settings.rebuild(&snapshot);

    let keys = KeyProvider::new(storage.clone(), store.clone(), DEFAULT_BLACKLIST_THRESHOLD);
    keys.reload(snapshot.api_keys.clone()).await;

    let hub = Arc::new(Hub::new(storage.clone(), keys.clone()));
    hub.reload(&snapshot).await;

    let clients = Arc::new(HttpClientPool::new());
    let pipeline = Arc::new(Pipeline::new(hub.clone(), keys.clone(), clients.clone()));

    let request_log_reporter = RequestLogReporter::new(store.clone());

    let mut background = Vec::new();
    background.push(crate::settings::spawn_settings_listener(
        store.clone(),
        storage.clone(),
        hub.clone(),
        keys.clone(),
        clients.clone(),
        settings.clone(),
    ));

    if is_master {
        let validator: Arc<dyn keyhub_keypool::KeyValidator> = Arc::new(UpstreamKeyValidator::new(hub.groups.clone(), clients.clone()));
        let notifier: Arc<dyn keyhub_keypool::ClusterNotifier> = Arc::new(StoreClusterNotifier { store: store.clone() });
        background.push(
            Arc::new(RestoreWorker::new(storage.clone(), validator, keys.clone(), notifier, KEY_RESTORE_CONCURRENCY, KEY_RESTORE_INTERVAL))
                .spawn(),
        );
        background.push(hub.weight.clone().spawn_persistence_worker(WEIGHT_PERSISTENCE_INTERVAL));
        background.extend(spawn_observability(storage.clone(), store.clone(), ObservabilityConfig::default()));
    }

    Ok(Node { config, storage, store, hub, keys, clients, pipeline, settings, request_log_reporter, db: db_for_shutdown, background })
}

/// Bridges `keyhub-keypool`'s restoration sweep to the same settings-version
/// bump/pub-sub path admin mutations use (`crate::settings::
/// bump_settings_version`), so a key restored by the cron sweep becomes
/// selectable on every node, not just this one.
struct StoreClusterNotifier {
    store: Arc<dyn KvStore>,
}

#[async_trait]
impl keyhub_keypool::ClusterNotifier for StoreClusterNotifier {
    async fn notify_keys_changed(&self) {
        if let Err(err) = crate::settings::bump_settings_version(self.store.as_ref()).await {
            tracing::warn!(error = %err, "failed to publish settings version after key restoration");
        }
    }
}

fn resolve_auth_key_hash(
    args: &CliArgs,
    storage: &Arc<dyn Storage>,
    is_master: bool,
    existing_hash: Option<String>,
) -> anyhow::Result<Option<String>> {
    if let Some(plain) = sanitize_optional_env_value(args.auth_key.clone()) {
        return Ok(Some(storage.hash_candidate(&plain)));
    }
    if existing_hash.is_some() {
        return Ok(None);
    }
    if !is_master {
        // A slave with neither an ENV key nor a DB-persisted hash must wait
        // for the leader to have bootstrapped first; surfaced as a startup
        // failure rather than silently running unauthenticated.
        return Ok(None);
    }
    let plain = generate_auth_key();
    eprintln!("generated auth key: {plain}");
    Ok(Some(storage.hash_candidate(&plain)))
}

async fn build_store(config: &GlobalConfig) -> anyhow::Result<Arc<dyn KvStore>> {
    match &config.redis_dsn {
        Some(dsn) => {
            let store = RedisStore::connect(dsn).await.context("connect redis store")?;
            Ok(Arc::new(store))
        }
        None => Ok(MemoryStore::new()),
    }
}

/// "The leader clears the shared store" (spec §4.9) on every fresh start —
/// best-effort, since a store outage here shouldn't block the leader from
/// serving traffic with its own freshly-loaded snapshot.
async fn clear_shared_store(store: &dyn KvStore) {
    let Ok(keys) = store.scan_prefix("").await else {
        tracing::warn!("failed to scan shared store for startup clear");
        return;
    };
    for key in keys {
        if let Err(err) = store.delete(&key).await {
            tracing::warn!(key = %key, error = %err, "failed to clear shared store key");
        }
    }
}

fn patch_from_json(value: &serde_json::Value) -> GlobalConfigPatch {
    GlobalConfigPatch {
        is_master: None,
        host: value.get("host").and_then(|v| v.as_str()).map(str::to_string),
        port: value.get("port").and_then(|v| v.as_u64()).map(|v| v as u16),
        database_dsn: value.get("database_dsn").and_then(|v| v.as_str()).map(str::to_string),
        redis_dsn: value.get("redis_dsn").and_then(|v| v.as_str()).map(str::to_string),
        encryption_key: None,
        auth_key_hash: value.get("auth_key_hash").and_then(|v| v.as_str()).map(str::to_string),
        graceful_shutdown_timeout_secs: value.get("graceful_shutdown_timeout_secs").and_then(|v| v.as_u64()),
        health_threshold: value.get("health_threshold").and_then(|v| v.as_f64()),
    }
}

fn config_to_json(config: &GlobalConfig) -> serde_json::Value {
    serde_json::json!({
        "host": config.host,
        "port": config.port,
        "database_dsn": config.database_dsn,
        "redis_dsn": config.redis_dsn,
        "auth_key_hash": config.auth_key_hash,
        "graceful_shutdown_timeout_secs": config.graceful_shutdown_timeout_secs,
        "health_threshold": config.health_threshold,
    })
}

fn sanitize_optional_env_value(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

fn sanitize_dsn_value(value: Option<String>) -> String {
    sanitize_optional_env_value(value).unwrap_or_else(default_dsn)
}

fn default_dsn() -> String {
    if let Some(data_dir) = sanitize_optional_env_value(std::env::var("KEYHUB_DATA_DIR").ok()) {
        let dir = data_dir.trim_end_matches('/');
        return format!("sqlite://{dir}/keyhub.db?mode=rwc");
    }
    "sqlite://keyhub.db?mode=rwc".to_string()
}

fn ensure_sqlite_parent_dir(dsn: &str) -> anyhow::Result<()> {
    let Some(db_path) = sqlite_file_path_from_dsn(dsn) else {
        return Ok(());
    };
    let Some(parent) = db_path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).with_context(|| format!("create sqlite parent dir {}", parent.display()))?;
    Ok(())
}

pub(crate) fn sqlite_file_path_from_dsn(dsn: &str) -> Option<PathBuf> {
    let rest = dsn.strip_prefix("sqlite:")?;
    let path_part = rest.split(['?', '#']).next()?.trim();
    if path_part.is_empty() {
        return None;
    }
    let mut normalized = path_part;
    if let Some(stripped) = normalized.strip_prefix("//") {
        normalized = stripped;
    }
    if normalized.to_ascii_lowercase() == ":memory:" {
        return None;
    }
    Some(PathBuf::from(normalized))
}

fn parse_u16_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u16>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    raw.parse::<u16>().map(Some).with_context(|| format!("invalid {env_name} value: {raw}"))
}

fn parse_u64_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u64>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    raw.parse::<u64>().map(Some).with_context(|| format!("invalid {env_name} value: {raw}"))
}

fn parse_bool_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<bool>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(anyhow::anyhow!("invalid {env_name} value: {raw}")),
    }
}

fn generate_auth_key() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_dsn_resolves_relative_path() {
        let path = sqlite_file_path_from_dsn("sqlite://keyhub.db?mode=rwc").unwrap();
        assert_eq!(path.to_string_lossy(), "keyhub.db");
    }

    #[test]
    fn sqlite_dsn_resolves_absolute_path() {
        let path = sqlite_file_path_from_dsn("sqlite://app/data/keyhub.db?mode=rwc").unwrap();
        assert_eq!(path.to_string_lossy(), "/app/data/keyhub.db");
    }

    #[test]
    fn sqlite_memory_dsn_is_ignored() {
        assert!(sqlite_file_path_from_dsn("sqlite::memory:").is_none());
        assert!(sqlite_file_path_from_dsn("sqlite://:memory:").is_none());
    }

    #[test]
    fn bool_env_parses_common_truthy_values() {
        assert_eq!(parse_bool_env_value(Some("yes".to_string()), "X").unwrap(), Some(true));
        assert_eq!(parse_bool_env_value(Some("0".to_string()), "X").unwrap(), Some(false));
        assert!(parse_bool_env_value(Some("maybe".to_string()), "X").is_err());
    }

    #[test]
    fn placeholder_env_value_is_treated_as_unset() {
        assert_eq!(sanitize_optional_env_value(Some("${DATABASE_DSN}".to_string())), None);
    }
}
