use serde::{Deserialize, Serialize};

/// Wraps the 32-byte secret so `keyhub-db::crypto` has a typed handle instead
/// of passing a bare `[u8; 32]` (and risking it landing in a `Debug` log).
#[derive(Clone, Copy)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// BLAKE3's keyed-hash API wants its key as `&[u8; 32]` too, but under a
    /// name that makes the two derivations (AEAD vs. hash) visibly distinct
    /// at the call site.
    pub fn as_blake3_key(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

impl From<[u8; 32]> for EncryptionKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Process-wide configuration, read once at bootstrap (spec §6 "Environment
/// variables") and republished to the in-memory `SystemSetting` cache on
/// every settings change (spec §4.9).
///
/// Merge order mirrors the teacher's bootstrap: CLI > ENV > DB, then
/// persisted back to DB so the next cold start sees the same values even if
/// the process is later started without the CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub is_master: bool,
    pub host: String,
    pub port: u16,
    /// Database DSN (postgres/mysql/sqlite, parsed by `keyhub-db`).
    pub database_dsn: String,
    /// Optional remote `KvStore` DSN; `None` selects the in-memory store.
    pub redis_dsn: Option<String>,
    /// 32-byte key used to derive AES-256-GCM encryption and the keyed BLAKE3
    /// hash used for deterministic key lookups. Never logged.
    pub encryption_key: [u8; 32],
    /// Bootstrap admin/auth key (plaintext only at the boundary; stored hashed).
    pub auth_key_hash: String,
    pub graceful_shutdown_timeout_secs: u64,
    /// Hub health-score threshold default (spec §9 Open Question resolution).
    pub health_threshold: f64,
}

impl GlobalConfig {
    pub const DEFAULT_HEALTH_THRESHOLD: f64 = 0.3;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalConfigPatch {
    pub is_master: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database_dsn: Option<String>,
    pub redis_dsn: Option<String>,
    pub encryption_key: Option<[u8; 32]>,
    pub auth_key_hash: Option<String>,
    pub graceful_shutdown_timeout_secs: Option<u64>,
    pub health_threshold: Option<f64>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        macro_rules! take {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field;
                }
            };
        }
        take!(is_master);
        take!(host);
        take!(port);
        take!(database_dsn);
        take!(redis_dsn);
        take!(encryption_key);
        take!(auth_key_hash);
        take!(graceful_shutdown_timeout_secs);
        take!(health_threshold);
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        Ok(GlobalConfig {
            is_master: self.is_master.unwrap_or(false),
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8080),
            database_dsn: self
                .database_dsn
                .ok_or(GlobalConfigError::MissingField("database_dsn"))?,
            redis_dsn: self.redis_dsn,
            encryption_key: self
                .encryption_key
                .ok_or(GlobalConfigError::MissingField("encryption_key"))?,
            auth_key_hash: self
                .auth_key_hash
                .ok_or(GlobalConfigError::MissingField("auth_key_hash"))?,
            graceful_shutdown_timeout_secs: self.graceful_shutdown_timeout_secs.unwrap_or(30),
            health_threshold: self
                .health_threshold
                .unwrap_or(GlobalConfig::DEFAULT_HEALTH_THRESHOLD),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            is_master: Some(value.is_master),
            host: Some(value.host),
            port: Some(value.port),
            database_dsn: Some(value.database_dsn),
            redis_dsn: value.redis_dsn,
            encryption_key: Some(value.encryption_key),
            auth_key_hash: Some(value.auth_key_hash),
            graceful_shutdown_timeout_secs: Some(value.graceful_shutdown_timeout_secs),
            health_threshold: Some(value.health_threshold),
        }
    }
}

/// Parses a hex-or-raw 32 byte encryption key from `ENCRYPTION_KEY`.
pub fn parse_encryption_key(raw: &str) -> Result<[u8; 32], GlobalConfigError> {
    let trimmed = raw.trim();
    if let Ok(bytes) = hex_decode(trimmed) {
        if bytes.len() == 32 {
            let mut out = [0u8; 32];
            out.copy_from_slice(&bytes);
            return Ok(out);
        }
    }
    let bytes = trimmed.as_bytes();
    if bytes.len() == 32 {
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        return Ok(out);
    }
    Err(GlobalConfigError::InvalidValue {
        field: "encryption_key",
        value: "must be 32 raw bytes or 64 hex characters".to_string(),
    })
}

fn hex_decode(s: &str) -> Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 {
        return Err(());
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let hi = hex_val(bytes[i]).ok_or(())?;
        let lo = hex_val(bytes[i + 1]).ok_or(())?;
        out.push((hi << 4) | lo);
        i += 2;
    }
    Ok(out)
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// A single proxy hop in a group's `proxy_url` chain (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyHop {
    pub url: String,
}

/// One rewrite applied to an upstream header before forwarding (spec §6
/// `header_rules`), the same "set/remove/rename" shape as the teacher's
/// header-transform config (`gproxy-provider-core/src/config`), generalized
/// from per-provider static headers to an ordered per-group rule list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HeaderRule {
    Set { name: String, value: String },
    Remove { name: String },
}

/// Typed view of `Group.config` (spec §3, §6). Stored as `serde_json::Value`
/// at the storage boundary (`groups.config` is `Json`), parsed into this
/// shape wherever request handling or the HTTP client pool needs a field —
/// the same split as the teacher's `ProviderConfig`
/// (`gproxy-provider-core/src/config/provider_config.rs`), generalized from a
/// tagged per-channel enum to one flat struct since this spec's options are
/// shared across every channel type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub idle_conn_timeout_secs: u64,
    pub response_header_timeout_secs: u64,
    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,
    pub max_retries: u32,
    /// Consecutive (non-key-fatal) failures before a key is blacklisted.
    pub blacklist_threshold: i32,
    pub key_validation_interval_minutes: u64,
    pub key_validation_concurrency: usize,
    /// Comma-separated in storage; parsed into hops here.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub proxy_chain: Vec<ProxyHop>,
    /// Permits a non-Anthropic group to serve `claude`-relay requests via
    /// `keyhub-transform` conversion.
    pub cc_support: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub header_rules: Vec<HeaderRule>,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 600,
            connect_timeout_secs: 10,
            idle_conn_timeout_secs: 90,
            response_header_timeout_secs: 60,
            max_idle_conns: 100,
            max_idle_conns_per_host: 10,
            max_retries: 3,
            blacklist_threshold: 3,
            key_validation_interval_minutes: 10,
            key_validation_concurrency: 4,
            proxy_chain: Vec::new(),
            cc_support: false,
            header_rules: Vec::new(),
        }
    }
}

impl GroupConfig {
    /// Parses `groups.config` (a JSON object, possibly missing fields added
    /// by a later schema version). Unknown/missing fields fall back to
    /// `Default`, matching spec §6's framing of these as "recognized
    /// options" rather than a strict schema.
    pub fn from_json(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    /// Parses the comma-separated `proxy_url` chain (spec §6: "chain of
    /// http/https/socks5 URLs, comma-separated").
    pub fn parse_proxy_chain(raw: &str) -> Vec<ProxyHop> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| ProxyHop { url: s.to_string() })
            .collect()
    }
}

/// Typed view of `Group.preconditions` (spec §3, §6). `None` at the storage
/// boundary means "no preconditions row" — selection fails open on that case
/// (spec §4.6 step 4), distinct from `max_request_size_kb: Some(0)` which
/// means "explicitly unlimited".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct GroupPreconditions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_request_size_kb: Option<u64>,
}

impl GroupPreconditions {
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// `true` when `request_size_kb` should disqualify this group under step
    /// 4 of Hub selection (spec §4.6). A zero or absent limit means
    /// unlimited.
    pub fn exceeds(&self, request_size_kb: u64) -> bool {
        match self.max_request_size_kb {
            Some(limit) if limit > 0 => request_size_kb > limit,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_key() {
        let hex = "00".repeat(32);
        let key = parse_encryption_key(&hex).unwrap();
        assert_eq!(key, [0u8; 32]);
    }

    #[test]
    fn parses_raw_32_byte_key() {
        let raw = "a".repeat(32);
        let key = parse_encryption_key(&raw).unwrap();
        assert_eq!(key.len(), 32);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(parse_encryption_key("short").is_err());
    }

    #[test]
    fn patch_overlay_prefers_later_values() {
        let mut base = GlobalConfigPatch {
            port: Some(1),
            ..Default::default()
        };
        base.overlay(GlobalConfigPatch {
            port: Some(2),
            ..Default::default()
        });
        assert_eq!(base.port, Some(2));
    }

    #[test]
    fn group_config_defaults_fill_missing_fields() {
        let config = GroupConfig::from_json(&serde_json::json!({"cc_support": true}));
        assert!(config.cc_support);
        assert_eq!(config.max_retries, GroupConfig::default().max_retries);
    }

    #[test]
    fn proxy_chain_splits_and_trims() {
        let hops = GroupConfig::parse_proxy_chain(" http://a:1 , socks5://b:2,");
        assert_eq!(hops.len(), 2);
        assert_eq!(hops[0].url, "http://a:1");
        assert_eq!(hops[1].url, "socks5://b:2");
    }

    #[test]
    fn preconditions_fail_open_when_row_absent() {
        assert!(GroupPreconditions::from_json(&serde_json::Value::Null).is_none());
    }

    #[test]
    fn preconditions_zero_limit_means_unlimited() {
        let p = GroupPreconditions { max_request_size_kb: Some(0) };
        assert!(!p.exceeds(10_000));
    }

    #[test]
    fn preconditions_reject_when_exceeded() {
        let p = GroupPreconditions { max_request_size_kb: Some(100) };
        assert!(p.exceeds(150));
        assert!(!p.exceeds(50));
    }
}
