//! Hub access-key validation (spec §4.6 "Access keys gate Hub requests").
//!
//! Storage only loads the full `hub_access_keys` table on snapshot (there is
//! no per-hash query in `Storage`), so this keeps its own `ArcSwap` map the
//! same way `GroupCache` does, and fronts it with `KeyProvider`'s moka cache
//! so a hot key never re-walks the map on every request.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use keyhub_db::entities::hub_access_keys;
use keyhub_keypool::{HubAccessKeyRecord, KeyProvider};

use crate::error::HubError;

pub struct AccessKeyGate {
    keys: Arc<KeyProvider>,
    by_hash: ArcSwap<HashMap<String, HubAccessKeyRecord>>,
}

impl AccessKeyGate {
    pub fn new(keys: Arc<KeyProvider>) -> Self {
        Self { keys, by_hash: ArcSwap::from_pointee(HashMap::new()) }
    }

    /// Rebuilds the lookup map from a full storage snapshot, and clears the
    /// moka front cache so a just-disabled key takes effect immediately
    /// instead of surviving out to its TTL.
    pub async fn reload(&self, rows: &[hub_access_keys::Model]) {
        let map = rows
            .iter()
            .map(|row| {
                let allowed_models = serde_json::from_value::<Vec<String>>(row.allowed_models.clone()).unwrap_or_default();
                (
                    row.key_hash.clone(),
                    HubAccessKeyRecord {
                        id: row.id,
                        name: row.name.clone(),
                        allowed_models,
                        enabled: row.enabled,
                        last_used_at: row.last_used_at,
                    },
                )
            })
            .collect();
        self.by_hash.store(Arc::new(map));
    }

    /// Validates a presented key hash against `model_name`, returning the
    /// matched record on success.
    pub async fn authorize(&self, hash: &str, model_name: &str) -> Result<HubAccessKeyRecord, HubError> {
        let record = match self.keys.hub_access_key_by_hash(hash).await {
            Some(record) => record,
            None => {
                let looked_up = self.by_hash.load().get(hash).cloned();
                self.keys.cache_access_key(hash.to_string(), looked_up.clone()).await;
                looked_up.ok_or(HubError::Unauthorized)?
            }
        };
        if !record.enabled {
            return Err(HubError::DisabledKey);
        }
        if !record.allowed_models.is_empty() && !record.allowed_models.iter().any(|m| m == model_name) {
            return Err(HubError::ModelNotAllowed(model_name.to_string()));
        }
        Ok(record)
    }

    /// Invalidates one key's cache entry (spec §4.8 "key disabled mid-flight
    /// takes effect on the next request"), called after an admin mutation.
    pub async fn invalidate(&self, hash: &str) {
        self.keys.invalidate_access_key(hash).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyhub_store::MemoryStore;
    use time::OffsetDateTime;

    fn provider() -> Arc<KeyProvider> {
        KeyProvider::new(Arc::new(crate::test_support::NoopStorage), MemoryStore::new(), 3)
    }

    fn row(id: i64, hash: &str, enabled: bool, allowed: serde_json::Value) -> hub_access_keys::Model {
        hub_access_keys::Model {
            id,
            name: format!("key-{id}"),
            key_hash: hash.to_string(),
            key_value: vec![],
            allowed_models: allowed,
            enabled,
            usage_count: 0,
            last_used_at: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn unknown_hash_is_unauthorized() {
        let gate = AccessKeyGate::new(provider());
        assert!(matches!(gate.authorize("missing", "gpt-4o").await, Err(HubError::Unauthorized)));
    }

    #[tokio::test]
    async fn disabled_record_is_rejected() {
        let gate = AccessKeyGate::new(provider());
        gate.reload(&[row(1, "h1", false, serde_json::json!([]))]).await;
        assert!(matches!(gate.authorize("h1", "gpt-4o").await, Err(HubError::DisabledKey)));
    }

    #[tokio::test]
    async fn empty_allowed_models_means_unrestricted() {
        let gate = AccessKeyGate::new(provider());
        gate.reload(&[row(2, "h2", true, serde_json::json!([]))]).await;
        assert!(gate.authorize("h2", "anything").await.is_ok());
    }

    #[tokio::test]
    async fn model_outside_allow_list_is_rejected() {
        let gate = AccessKeyGate::new(provider());
        gate.reload(&[row(3, "h3", true, serde_json::json!(["gpt-4o"]))]).await;
        assert!(gate.authorize("h3", "gpt-4o").await.is_ok());
        assert!(matches!(gate.authorize("h3", "claude-3").await, Err(HubError::ModelNotAllowed(_))));
    }

    #[tokio::test]
    async fn result_is_cached_after_first_lookup() {
        let gate = AccessKeyGate::new(provider());
        gate.reload(&[row(4, "h4", true, serde_json::json!([]))]).await;
        assert!(gate.authorize("h4", "m").await.is_ok());
        // Second call should hit the moka front cache, not the map, and still succeed.
        assert!(gate.authorize("h4", "m").await.is_ok());
    }
}
