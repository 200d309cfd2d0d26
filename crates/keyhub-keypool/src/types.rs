use std::time::Instant;

use time::OffsetDateTime;

/// In-memory view of one `api_keys` row, rebuilt whenever its group's key
/// list is reloaded. Decryption happens lazily, only on acquisition, so the
/// cached list itself never holds plaintext.
#[derive(Debug, Clone)]
pub struct ActiveKey {
    pub id: i64,
    pub group_id: i64,
    pub key_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Active,
    Invalid,
}

impl KeyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Invalid => "invalid",
        }
    }
}

/// Classification of a completed upstream attempt, as reported by
/// `keyhub-proxy`'s pipeline after every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Upstream authoritatively rejected the credential (revoked, quota
    /// exhausted, banned). Moves the key to `invalid` immediately.
    KeyFatal,
    /// Transient failure (timeout, 5xx). Counted toward the blacklist
    /// threshold but does not itself blacklist the key.
    Transient,
}

#[derive(Debug, Clone)]
pub struct OutcomeReport {
    pub group_id: i64,
    pub key_id: i64,
    pub outcome: Outcome,
}

#[derive(Debug, thiserror::Error)]
pub enum KeyPoolError {
    #[error("group {0} has no known keys")]
    UnknownGroup(i64),
    #[error("group {0} has no active keys")]
    NoActiveKeys(i64),
}

/// A key checked out for one attempt. `acquired_at` feeds restoration backoff
/// bookkeeping; `plaintext` is decrypted fresh on every acquisition.
#[derive(Debug, Clone)]
pub struct AcquiredKey {
    pub key_id: i64,
    pub plaintext: String,
    pub acquired_at: Instant,
}

#[derive(Debug, Clone)]
pub struct HubAccessKeyRecord {
    pub id: i64,
    pub name: String,
    pub allowed_models: Vec<String>,
    pub enabled: bool,
    pub last_used_at: Option<OffsetDateTime>,
}
