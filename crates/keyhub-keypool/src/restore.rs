//! Restoration cron, mirroring the teacher's `UnavailableQueue::spawn_recover_task`
//! (`gproxy-provider-core/src/credential/unavailable_queue.rs`) generalized
//! from a timer-wheel recovery queue into a periodic full scan — this
//! spec's key set is small enough per group that a scan-and-validate sweep
//! at a multi-minute interval is simpler and just as correct.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keyhub_db::entities::api_keys;
use keyhub_db::Storage;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::pool::KeyProvider;
use crate::types::KeyStatus;

/// Issues the minimal upstream request (a `test_model` completion) that
/// proves a credential is valid again. Implemented in `keyhub-proxy`, which
/// owns the HTTP client pool — `keyhub-keypool` stays HTTP-agnostic.
#[async_trait]
pub trait KeyValidator: Send + Sync {
    async fn validate(&self, group_id: i64, plaintext_key: &str) -> bool;
}

/// Tells the rest of the cluster that key state changed, so every node's
/// in-memory key pool (not just this one) refreshes (spec §4.9 "Settings
/// changes flow"). `keyhub-keypool` stays free of `keyhub-cluster`'s
/// settings-version machinery; `keyhub-cluster`'s `bootstrap` supplies the
/// real implementation over `bump_settings_version`/the shared store's
/// pub/sub, the same path admin mutations use.
#[async_trait]
pub trait ClusterNotifier: Send + Sync {
    async fn notify_keys_changed(&self);
}

pub struct RestoreWorker {
    storage: Arc<dyn Storage>,
    validator: Arc<dyn KeyValidator>,
    provider: Arc<KeyProvider>,
    notifier: Arc<dyn ClusterNotifier>,
    concurrency: usize,
    interval: Duration,
}

impl RestoreWorker {
    pub fn new(
        storage: Arc<dyn Storage>,
        validator: Arc<dyn KeyValidator>,
        provider: Arc<KeyProvider>,
        notifier: Arc<dyn ClusterNotifier>,
        concurrency: usize,
        interval: Duration,
    ) -> Self {
        Self { storage, validator, provider, notifier, concurrency, interval }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                if let Err(err) = self.sweep().await {
                    tracing::warn!(error = %err, "key restoration sweep failed to load snapshot");
                }
            }
        })
    }

    async fn sweep(&self) -> keyhub_db::StorageResult<()> {
        let snapshot = self.storage.load_snapshot().await?;
        let invalid: Vec<api_keys::Model> = snapshot
            .api_keys
            .into_iter()
            .filter(|k| k.status == KeyStatus::Invalid.as_str())
            .collect();
        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut handles = Vec::with_capacity(invalid.len());
        for key in invalid {
            let semaphore = semaphore.clone();
            let storage = self.storage.clone();
            let validator = self.validator.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                let Ok(plaintext) = storage.decrypt_api_key(&key) else {
                    return false;
                };
                if validator.validate(key.group_id, &plaintext).await {
                    storage.set_api_key_status(key.id, KeyStatus::Active.as_str()).await.is_ok()
                } else {
                    false
                }
            }));
        }
        let mut any_restored = false;
        for handle in handles {
            if let Ok(true) = handle.await {
                any_restored = true;
            }
        }

        // A restored key is only selectable again once the in-memory pool
        // that backs `pick()` reflects it (spec §4.3 "Restoration" implies
        // the key becomes pickable again, not merely `active` in the DB).
        // Refresh this node's own cache immediately, then tell the rest of
        // the cluster the same way an admin mutation would.
        if any_restored {
            let fresh = self.storage.load_snapshot().await?;
            self.provider.reload(fresh.api_keys).await;
            self.notifier.notify_keys_changed().await;
        }
        Ok(())
    }
}
