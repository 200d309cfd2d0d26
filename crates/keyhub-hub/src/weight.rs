//! Dynamic Weight: rolling health counters per standard group and per
//! `(aggregate_group_id, sub_group_id)` (spec §4.7), and the pure scoring
//! function the Hub calls to turn those counters into a [0,1] health score.
//!
//! Counters are lock-free atomics, grounded in the `DeploymentState` design
//! of `examples/other_examples/.../deployment.rs` ("All state tracking uses
//! atomic operations ... routing can tolerate slightly stale state"),
//! generalized from per-deployment TPM/RPM/health-enum state to this spec's
//! narrower request/failure/last-failure counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use keyhub_db::entities::dynamic_weight_metrics;
use keyhub_db::Storage;
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// One atomic counter slot, shared by the standard-group table and the
/// aggregate/sub-group table (spec §3 "Two tables ... Each row carries
/// rolling counters").
#[derive(Default)]
pub struct MetricSlot {
    requests: AtomicU64,
    failures: AtomicU64,
    /// Unix seconds of the most recent failure, 0 if none recorded yet.
    last_failure_at: AtomicI64,
    /// Soft-delete marker (spec §4.7: sub-group removal/re-add preserves
    /// history). `0` = not deleted.
    deleted_at: AtomicI64,
}

impl MetricSlot {
    fn record(&self, success: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failures.fetch_add(1, Ordering::Relaxed);
            self.last_failure_at.store(OffsetDateTime::now_utc().unix_timestamp(), Ordering::Relaxed);
        }
        self.deleted_at.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MetricSnapshot {
        MetricSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            last_failure_at: self.last_failure_at.load(Ordering::Relaxed),
            deleted_at: self.deleted_at.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricSnapshot {
    pub requests: u64,
    pub failures: u64,
    pub last_failure_at: i64,
    pub deleted_at: i64,
}

impl MetricSnapshot {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at != 0
    }
}

/// Pure scoring function (spec §4.6/§4.7: "The scoring function is pure
/// given inputs and is also exported so the Hub can call it"). No history
/// (`requests == 0`) fails open at `1.0`; otherwise a weighted success rate
/// with a penalty for a very recent failure.
pub fn score(snapshot: &MetricSnapshot, now_unix: i64) -> f64 {
    if snapshot.requests == 0 || snapshot.is_deleted() {
        return 1.0;
    }
    let success_rate = 1.0 - (snapshot.failures as f64 / snapshot.requests as f64);
    let recency_penalty = if snapshot.last_failure_at > 0 {
        let age = (now_unix - snapshot.last_failure_at).max(0);
        // A failure in the last 60s costs up to 0.3; decays linearly to 0 over 10 minutes.
        let window = 600i64;
        if age < window {
            0.3 * (1.0 - age as f64 / window as f64)
        } else {
            0.0
        }
    } else {
        0.0
    };
    (success_rate - recency_penalty).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKey {
    Group(i64),
    SubGroup { aggregate_id: i64, sub_group_id: i64 },
}

pub struct DynamicWeight {
    slots: RwLock<HashMap<MetricKey, Arc<MetricSlot>>>,
    storage: Arc<dyn Storage>,
}

impl DynamicWeight {
    pub fn new(storage: Arc<dyn Storage>) -> Arc<Self> {
        Arc::new(Self { slots: RwLock::new(HashMap::new()), storage })
    }

    async fn slot(&self, key: MetricKey) -> Arc<MetricSlot> {
        if let Some(slot) = self.slots.read().await.get(&key) {
            return slot.clone();
        }
        let mut slots = self.slots.write().await;
        slots.entry(key).or_insert_with(|| Arc::new(MetricSlot::default())).clone()
    }

    /// Loads persisted counters back at startup (spec §4.7 "on startup,
    /// metrics are loaded back").
    pub async fn load(&self, rows: &[dynamic_weight_metrics::Model]) {
        let mut slots = self.slots.write().await;
        for row in rows {
            let key = match (row.aggregate_group_id, row.sub_group_id) {
                (Some(agg), Some(sub)) => MetricKey::SubGroup { aggregate_id: agg, sub_group_id: sub },
                _ => MetricKey::Group(row.group_id),
            };
            let slot = MetricSlot::default();
            slot.requests.store(row.requests.max(0) as u64, Ordering::Relaxed);
            slot.failures.store(row.failures.max(0) as u64, Ordering::Relaxed);
            slot.last_failure_at.store(
                row.last_failure_at.map(|t| t.unix_timestamp()).unwrap_or(0),
                Ordering::Relaxed,
            );
            slot.deleted_at.store(row.deleted_at.map(|t| t.unix_timestamp()).unwrap_or(0), Ordering::Relaxed);
            slots.insert(key, Arc::new(slot));
        }
    }

    /// Records a completed attempt's outcome against a standard group.
    pub async fn report_group(&self, group_id: i64, success: bool) {
        self.slot(MetricKey::Group(group_id)).await.record(success);
    }

    /// Records a completed attempt's outcome against one sub-group's
    /// contribution to an aggregate's health.
    pub async fn report_sub_group(&self, aggregate_id: i64, sub_group_id: i64, success: bool) {
        self.slot(MetricKey::SubGroup { aggregate_id, sub_group_id }).await.record(success);
    }

    pub async fn group_score(&self, group_id: i64, now_unix: i64) -> f64 {
        match self.slots.read().await.get(&MetricKey::Group(group_id)) {
            Some(slot) => score(&slot.snapshot(), now_unix),
            None => 1.0,
        }
    }

    /// Request-count-weighted average over an aggregate's enabled
    /// sub-groups (spec §4.6 "Health score ... Per aggregate group").
    /// Sub-groups with no history contribute weight 0, matching the spec's
    /// explicit carve-out.
    pub async fn aggregate_score(&self, aggregate_id: i64, sub_group_ids: &[i64], now_unix: i64) -> f64 {
        let slots = self.slots.read().await;
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for &sub_id in sub_group_ids {
            let key = MetricKey::SubGroup { aggregate_id, sub_group_id: sub_id };
            let Some(slot) = slots.get(&key) else { continue };
            let snapshot = slot.snapshot();
            if snapshot.requests == 0 {
                continue;
            }
            let weight = snapshot.requests as f64;
            weighted_sum += weight * score(&snapshot, now_unix);
            total_weight += weight;
        }
        if total_weight == 0.0 {
            1.0
        } else {
            weighted_sum / total_weight
        }
    }

    /// Soft-deletes a sub-group's metric row so a later re-add restores
    /// history instead of starting cold (spec §4.7).
    pub async fn soft_delete_sub_group(&self, aggregate_id: i64, sub_group_id: i64) {
        let key = MetricKey::SubGroup { aggregate_id, sub_group_id };
        let slot = self.slot(key).await;
        slot.deleted_at.store(OffsetDateTime::now_utc().unix_timestamp(), Ordering::Relaxed);
        let _ = self
            .storage
            .soft_delete_weight_metric(aggregate_id, sub_group_id, OffsetDateTime::now_utc())
            .await;
    }

    fn build_rows(&self, slots: &HashMap<MetricKey, Arc<MetricSlot>>) -> Vec<dynamic_weight_metrics::Model> {
        slots
            .iter()
            .map(|(key, slot)| {
                let snap = slot.snapshot();
                let (group_id, aggregate_group_id, sub_group_id) = match *key {
                    MetricKey::Group(id) => (id, None, None),
                    MetricKey::SubGroup { aggregate_id, sub_group_id } => (aggregate_id, Some(aggregate_id), Some(sub_group_id)),
                };
                dynamic_weight_metrics::Model {
                    id: 0,
                    group_id,
                    aggregate_group_id,
                    sub_group_id,
                    requests: snap.requests as i64,
                    failures: snap.failures as i64,
                    last_failure_at: non_zero_time(snap.last_failure_at),
                    deleted_at: non_zero_time(snap.deleted_at),
                    updated_at: OffsetDateTime::now_utc(),
                }
            })
            .collect()
    }

    /// Spawns the periodic batched-write persistence worker (spec §4.7:
    /// "Metrics are periodically persisted through a dedicated persistence
    /// worker that batches writes"), mirroring the teacher's `StorageBus`
    /// batched writers (`gproxy-storage/src/bus.rs`).
    pub fn spawn_persistence_worker(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let rows = {
                    let slots = self.slots.read().await;
                    self.build_rows(&slots)
                };
                if rows.is_empty() {
                    continue;
                }
                if let Err(err) = self.storage.persist_weight_metrics(rows).await {
                    tracing::warn!(error = %err, "dynamic weight persistence batch failed");
                }
            }
        })
    }
}

fn non_zero_time(unix: i64) -> Option<OffsetDateTime> {
    if unix == 0 {
        None
    } else {
        OffsetDateTime::from_unix_timestamp(unix).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_history_fails_open() {
        let snap = MetricSnapshot::default();
        assert_eq!(score(&snap, 0), 1.0);
    }

    #[test]
    fn all_success_scores_near_one() {
        let snap = MetricSnapshot { requests: 100, failures: 0, last_failure_at: 0, deleted_at: 0 };
        assert_eq!(score(&snap, 10_000), 1.0);
    }

    #[test]
    fn recent_failure_penalizes_more_than_stale_one() {
        let recent = MetricSnapshot { requests: 10, failures: 1, last_failure_at: 1000, deleted_at: 0 };
        let stale = MetricSnapshot { requests: 10, failures: 1, last_failure_at: 1000, deleted_at: 0 };
        let now_soon = 1010;
        let now_later = 1000 + 10_000;
        assert!(score(&recent, now_soon) < score(&stale, now_later));
    }

    #[test]
    fn deleted_slot_fails_open() {
        let snap = MetricSnapshot { requests: 10, failures: 9, last_failure_at: 5, deleted_at: 5 };
        assert_eq!(score(&snap, 100), 1.0);
    }

    #[tokio::test]
    async fn aggregate_score_ignores_subgroups_with_no_history() {
        let storage = Arc::new(crate::test_support::NoopStorage);
        let weight = DynamicWeight::new(storage);
        weight.report_sub_group(1, 10, true).await;
        // sub-group 20 never reported — must contribute weight 0, not drag the average down.
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let agg_score = weight.aggregate_score(1, &[10, 20], now).await;
        assert_eq!(agg_score, 1.0);
    }
}
