//! Generalizes the teacher's `CredentialPool`
//! (`gproxy-provider-core/src/credential/pool.rs`) from an in-process
//! "first active" scan to a store-backed deterministic rotation pointer —
//! REDESIGN FLAG resolution, grounded in the atomic round-robin counter of
//! `examples/other_examples/.../key_pool.rs` (`KeyPool::acquire`, `AtomicU64
//! next`). Outcome reporting keeps the teacher's shape (state map + recovery
//! queue) but moves the hot-path write behind a bounded `mpsc` worker, same
//! as the teacher's `StorageBus` batched writers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use keyhub_db::entities::api_keys;
use keyhub_db::Storage;
use keyhub_store::KvStore;
use moka::future::Cache;
use time::OffsetDateTime;
use tokio::sync::{mpsc, RwLock};

use crate::types::{
    AcquiredKey, HubAccessKeyRecord, KeyPoolError, KeyStatus, OutcomeReport, Outcome,
};

const OUTCOME_QUEUE_CAPACITY: usize = 4096;
const ACCESS_KEY_CACHE_TTL: Duration = Duration::from_secs(30);
const ACTIVE_KEYS_CACHE_TTL: Duration = Duration::from_secs(30);

struct GroupKeys {
    active: Vec<api_keys::Model>,
}

pub struct KeyProvider {
    storage: Arc<dyn Storage>,
    store: Arc<dyn KvStore>,
    /// Per-node fallback pointer, used only if the shared store is
    /// unreachable for a rotation increment; the shared counter is
    /// authoritative across the cluster.
    local_pointers: RwLock<HashMap<i64, AtomicI64>>,
    groups: RwLock<HashMap<i64, GroupKeys>>,
    access_key_cache: Cache<String, Option<HubAccessKeyRecord>>,
    blacklist_threshold: i32,
    outcomes_tx: mpsc::Sender<OutcomeReport>,
}

impl KeyProvider {
    pub fn new(storage: Arc<dyn Storage>, store: Arc<dyn KvStore>, blacklist_threshold: i32) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(OUTCOME_QUEUE_CAPACITY);
        let provider = Arc::new(Self {
            storage,
            store,
            local_pointers: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            access_key_cache: Cache::builder().time_to_live(ACCESS_KEY_CACHE_TTL).max_capacity(10_000).build(),
            blacklist_threshold,
            outcomes_tx: tx,
        });
        provider.clone().spawn_outcome_worker(rx);
        provider
    }

    /// Rebuilds the in-memory key snapshot for every group from a full load.
    /// Called at startup and on any invalidation event delivered over
    /// `keyhub-store` pub/sub.
    pub async fn reload(&self, all_keys: Vec<api_keys::Model>) {
        let mut by_group: HashMap<i64, Vec<api_keys::Model>> = HashMap::new();
        for key in all_keys {
            if key.status == KeyStatus::Active.as_str() {
                by_group.entry(key.group_id).or_default().push(key);
            }
        }
        let mut groups = self.groups.write().await;
        groups.clear();
        for (group_id, active) in by_group {
            groups.insert(group_id, GroupKeys { active });
        }
        // ACTIVE_KEYS_CACHE_TTL governs access_key_cache above; the
        // group->active-keys view here has no separate TTL cache because it
        // is rebuilt wholesale on every invalidation event instead — a
        // cheaper invalidation story than per-entry expiry for a map this
        // size.
        let _ = ACTIVE_KEYS_CACHE_TTL;
        drop(groups);
    }

    /// Picks the next active key for `group_id` under the rotation
    /// discipline, skipping any id in `exclude`.
    pub async fn pick(&self, group_id: i64, exclude: &[i64]) -> Result<AcquiredKey, KeyPoolError> {
        let groups = self.groups.read().await;
        let Some(entry) = groups.get(&group_id) else {
            return Err(KeyPoolError::UnknownGroup(group_id));
        };
        let candidates: Vec<&api_keys::Model> = entry
            .active
            .iter()
            .filter(|k| !exclude.contains(&k.id))
            .collect();
        if candidates.is_empty() {
            return Err(KeyPoolError::NoActiveKeys(group_id));
        }
        let pointer = self.next_pointer(group_id, candidates.len() as i64).await;
        let chosen = candidates[(pointer as usize) % candidates.len()];
        let plaintext = self
            .storage
            .decrypt_api_key(chosen)
            .map_err(|_| KeyPoolError::NoActiveKeys(group_id))?;
        Ok(AcquiredKey { key_id: chosen.id, plaintext, acquired_at: Instant::now() })
    }

    /// `store.incr` returns the *post*-increment value (like Redis `INCR`,
    /// starting at 1 on a fresh key), so the first pick on a brand-new group
    /// must subtract 1 to land on index 0 (spec scenario 1: first request
    /// picks k1, only then does the pointer advance to k2).
    async fn next_pointer(&self, group_id: i64, modulus: i64) -> i64 {
        let store_key = format!("rot:{group_id}");
        match self.store.incr(&store_key, 1).await {
            Ok(v) => (v - 1).rem_euclid(modulus.max(1)),
            Err(_) => {
                let mut pointers = self.local_pointers.write().await;
                let counter = pointers.entry(group_id).or_insert_with(|| AtomicI64::new(0));
                counter.fetch_add(1, Ordering::Relaxed).rem_euclid(modulus.max(1))
            }
        }
    }

    /// Queues an outcome report; never blocks the request path. If the
    /// worker queue is saturated, the oldest reports are implicitly dropped
    /// by `try_send`'s failure, which is logged and swallowed per spec §4.3
    /// "failure modes".
    pub fn report(&self, report: OutcomeReport) {
        if self.outcomes_tx.try_send(report).is_err() {
            tracing::warn!("key outcome queue saturated, dropping report");
        }
    }

    fn spawn_outcome_worker(self: Arc<Self>, mut rx: mpsc::Receiver<OutcomeReport>) {
        tokio::spawn(async move {
            while let Some(report) = rx.recv().await {
                self.apply_outcome(report).await;
            }
        });
    }

    async fn apply_outcome(&self, report: OutcomeReport) {
        let result = match report.outcome {
            Outcome::Success => self.storage.set_api_key_status(report.key_id, KeyStatus::Active.as_str()).await,
            Outcome::KeyFatal => self.blacklist(report.key_id).await,
            Outcome::Transient => self.bump_failure_count(report.group_id, report.key_id).await,
        };
        if let Err(err) = result {
            tracing::warn!(key_id = report.key_id, error = %err, "outcome report storage write failed");
        }
        let _ = self.storage.record_api_key_use(report.key_id, OffsetDateTime::now_utc()).await;
    }

    async fn blacklist(&self, key_id: i64) -> keyhub_db::StorageResult<()> {
        self.storage.set_api_key_status(key_id, KeyStatus::Invalid.as_str()).await?;
        self.evict_from_cache(key_id).await;
        Ok(())
    }

    async fn bump_failure_count(&self, group_id: i64, key_id: i64) -> keyhub_db::StorageResult<()> {
        let groups = self.groups.read().await;
        let current = groups
            .get(&group_id)
            .and_then(|g| g.active.iter().find(|k| k.id == key_id))
            .map(|k| k.failure_count)
            .unwrap_or(0);
        drop(groups);
        let next = current + 1;
        if next >= self.blacklist_threshold {
            return self.blacklist(key_id).await;
        }
        self.storage.record_api_key_failure(key_id, next).await
    }

    async fn evict_from_cache(&self, key_id: i64) {
        let mut groups = self.groups.write().await;
        for entry in groups.values_mut() {
            entry.active.retain(|k| k.id != key_id);
        }
    }

    pub async fn hub_access_key_by_hash(&self, hash: &str) -> Option<HubAccessKeyRecord> {
        if let Some(cached) = self.access_key_cache.get(hash).await {
            return cached;
        }
        // Populated by `keyhub-hub` via `cache_access_key`, which owns the
        // DB lookup (keyhub-keypool has no direct dependency on hub logic).
        None
    }

    /// Called by `keyhub-hub` after a fresh DB lookup (hit or miss — caching
    /// negative lookups absorbs attack traffic per spec §4.6).
    pub async fn cache_access_key(&self, hash: String, record: Option<HubAccessKeyRecord>) {
        self.access_key_cache.insert(hash, record).await;
    }

    pub async fn invalidate_access_key(&self, hash: &str) {
        self.access_key_cache.invalidate(hash).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyhub_store::MemoryStore;
    use std::sync::Arc;
    use time::OffsetDateTime;

    struct NoopStorage;

    #[async_trait::async_trait]
    impl Storage for NoopStorage {
        async fn sync(&self) -> keyhub_db::StorageResult<()> {
            Ok(())
        }
        async fn load_snapshot(&self) -> keyhub_db::StorageResult<keyhub_db::StorageSnapshot> {
            Ok(Default::default())
        }
        async fn upsert_group(&self, _: keyhub_db::entities::groups::Model) -> keyhub_db::StorageResult<i64> {
            Ok(0)
        }
        async fn delete_group(&self, _: i64) -> keyhub_db::StorageResult<()> {
            Ok(())
        }
        async fn upsert_sub_group(&self, _: keyhub_db::entities::group_sub_groups::Model) -> keyhub_db::StorageResult<i64> {
            Ok(0)
        }
        async fn remove_sub_group(&self, _: i64, _: i64) -> keyhub_db::StorageResult<()> {
            Ok(())
        }
        async fn insert_api_key(&self, _: keyhub_db::NewApiKey) -> keyhub_db::StorageResult<i64> {
            Ok(0)
        }
        async fn set_api_key_status(&self, _: i64, _: &str) -> keyhub_db::StorageResult<()> {
            Ok(())
        }
        async fn record_api_key_failure(&self, _: i64, _: i32) -> keyhub_db::StorageResult<()> {
            Ok(())
        }
        async fn record_api_key_use(&self, _: i64, _: OffsetDateTime) -> keyhub_db::StorageResult<()> {
            Ok(())
        }
        async fn delete_api_key(&self, _: i64) -> keyhub_db::StorageResult<()> {
            Ok(())
        }
        fn decrypt_api_key(&self, key: &api_keys::Model) -> keyhub_db::StorageResult<String> {
            Ok(format!("plain-{}", key.id))
        }
        async fn insert_hub_access_key(&self, _: keyhub_db::NewHubAccessKey) -> keyhub_db::StorageResult<i64> {
            Ok(0)
        }
        async fn set_hub_access_key_enabled(&self, _: i64, _: bool) -> keyhub_db::StorageResult<()> {
            Ok(())
        }
        async fn record_hub_access_key_use(&self, _: i64, _: OffsetDateTime) -> keyhub_db::StorageResult<()> {
            Ok(())
        }
        fn decrypt_hub_access_key(&self, _: &keyhub_db::entities::hub_access_keys::Model) -> keyhub_db::StorageResult<String> {
            Ok(String::new())
        }
        fn hash_candidate(&self, _: &str) -> String {
            String::new()
        }
        async fn upsert_priority(&self, _: &str, _: i64, _: i32) -> keyhub_db::StorageResult<()> {
            Ok(())
        }
        async fn persist_weight_metrics(&self, _: Vec<keyhub_db::entities::dynamic_weight_metrics::Model>) -> keyhub_db::StorageResult<()> {
            Ok(())
        }
        async fn soft_delete_weight_metric(&self, _: i64, _: i64, _: OffsetDateTime) -> keyhub_db::StorageResult<()> {
            Ok(())
        }
        async fn upsert_system_setting(&self, _: &str, _: serde_json::Value) -> keyhub_db::StorageResult<()> {
            Ok(())
        }
        async fn record_request_logs(&self, _: Vec<keyhub_db::entities::request_logs::Model>) -> keyhub_db::StorageResult<()> {
            Ok(())
        }
        async fn prune_request_logs(&self, _: OffsetDateTime) -> keyhub_db::StorageResult<u64> {
            Ok(0)
        }
        async fn upsert_hourly_stat(&self, _: i64, _: OffsetDateTime, _: i64, _: i64) -> keyhub_db::StorageResult<()> {
            Ok(())
        }
    }

    fn test_key(id: i64, group_id: i64) -> api_keys::Model {
        api_keys::Model {
            id,
            group_id,
            key_hash: format!("hash-{id}"),
            key_value: vec![],
            status: "active".to_string(),
            failure_count: 0,
            last_used_at: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn rotation_cycles_through_all_active_keys() {
        let provider = KeyProvider::new(Arc::new(NoopStorage), MemoryStore::new(), 3);
        provider.reload(vec![test_key(1, 10), test_key(2, 10), test_key(3, 10)]).await;
        let mut seen = std::collections::HashSet::new();
        for _ in 0..6 {
            let acquired = provider.pick(10, &[]).await.unwrap();
            seen.insert(acquired.key_id);
        }
        assert_eq!(seen, std::collections::HashSet::from([1, 2, 3]));
    }

    #[tokio::test]
    async fn first_pick_on_a_fresh_group_lands_on_index_zero() {
        // spec scenario 1: keys=[k1 active, k2 active] -> the first request
        // uses k1; only afterward does the pointer advance to k2. A
        // post-increment read of the rotation counter (store.incr returns 1
        // on a fresh key, not 0) would pick k2 first instead.
        let provider = KeyProvider::new(Arc::new(NoopStorage), MemoryStore::new(), 3);
        provider.reload(vec![test_key(1, 10), test_key(2, 10)]).await;
        let first = provider.pick(10, &[]).await.unwrap();
        assert_eq!(first.key_id, 1);
        let second = provider.pick(10, &[]).await.unwrap();
        assert_eq!(second.key_id, 2);
    }

    #[tokio::test]
    async fn exclude_list_skips_tried_keys() {
        let provider = KeyProvider::new(Arc::new(NoopStorage), MemoryStore::new(), 3);
        provider.reload(vec![test_key(1, 10), test_key(2, 10)]).await;
        for _ in 0..4 {
            let acquired = provider.pick(10, &[1]).await.unwrap();
            assert_eq!(acquired.key_id, 2);
        }
    }

    #[tokio::test]
    async fn unknown_group_is_an_error() {
        let provider = KeyProvider::new(Arc::new(NoopStorage), MemoryStore::new(), 3);
        assert!(matches!(provider.pick(999, &[]).await, Err(KeyPoolError::UnknownGroup(999))));
    }
}
