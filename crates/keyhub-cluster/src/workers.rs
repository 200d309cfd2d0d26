//! Request-log observability (spec §3 "request_logs / group_hourly_stats",
//! §4.9 "cron workers"): every node publishes a [`RequestLogEvent`] per
//! completed attempt over `keyhub-store` pub/sub; only the leader consumes
//! the stream and batches it into storage, so a single writer owns
//! `request_logs`/`group_hourly_stats` even with many nodes serving traffic.
//!
//! The batching loop is the teacher's `StorageBus` pattern transplanted
//! wholesale (`gproxy-storage/src/bus.rs::downstream_writer`): a bounded
//! channel, a `tokio::select!` between "buffer full" and "ticker fired", and
//! a final flush on channel close. The hourly rollup rides the same batch
//! loop (accumulated in-process, persisted on its own slower ticker) rather
//! than adding a "query logs for an hour" read path to [`Storage`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use keyhub_db::entities::request_logs;
use keyhub_db::Storage;
use keyhub_store::KvStore;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{self as tokio_time, MissedTickBehavior};

pub const REQUEST_LOG_CHANNEL: &str = "keyhub:requestlog:events";

const FLUSH_BATCH_SIZE: usize = 200;
const FLUSH_INTERVAL: Duration = Duration::from_millis(500);
const ROLLUP_PERSIST_INTERVAL: Duration = Duration::from_secs(60);
const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

/// Wire shape published over pub/sub. `created_at` is a unix timestamp
/// rather than `OffsetDateTime` directly — the workspace doesn't enable
/// `time`'s `serde` feature, since nothing else needs `OffsetDateTime` to
/// round-trip through JSON.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RequestLogEvent {
    pub group_id: i64,
    pub key_id: Option<i64>,
    pub model_name: Option<String>,
    pub relay_format: String,
    pub status_code: Option<i32>,
    pub error_kind: Option<String>,
    pub duration_ms: i64,
    pub created_at_unix: i64,
}

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub request_log_retention: Duration,
    pub flush_interval: Duration,
    pub flush_batch_size: usize,
    pub rollup_persist_interval: Duration,
    pub prune_interval: Duration,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            request_log_retention: Duration::from_secs(7 * 24 * 3600),
            flush_interval: FLUSH_INTERVAL,
            flush_batch_size: FLUSH_BATCH_SIZE,
            rollup_persist_interval: ROLLUP_PERSIST_INTERVAL,
            prune_interval: PRUNE_INTERVAL,
        }
    }
}

/// Publishes one event per served attempt. Held by every node (leader and
/// slave); publishing never blocks the request path beyond the store's own
/// `publish` latency, and a publish failure is logged and dropped rather
/// than surfaced to the caller.
pub struct RequestLogReporter {
    store: Arc<dyn KvStore>,
}

impl RequestLogReporter {
    pub fn new(store: Arc<dyn KvStore>) -> Arc<Self> {
        Arc::new(Self { store })
    }

    pub async fn report(&self, event: RequestLogEvent) {
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize request log event");
                return;
            }
        };
        if let Err(err) = self.store.publish(REQUEST_LOG_CHANNEL, &payload).await {
            tracing::warn!(error = %err, "failed to publish request log event");
        }
    }
}

/// Leader-only: subscribes to [`REQUEST_LOG_CHANNEL`] and runs the batched
/// flush worker plus the prune cron task. Returns every spawned handle so
/// the caller can track them for graceful shutdown.
pub fn spawn_observability(
    storage: Arc<dyn Storage>,
    store: Arc<dyn KvStore>,
    config: ObservabilityConfig,
) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(flush_worker(storage.clone(), store, config.clone())),
        tokio::spawn(prune_worker(storage, config)),
    ]
}

async fn flush_worker(storage: Arc<dyn Storage>, store: Arc<dyn KvStore>, config: ObservabilityConfig) {
    let mut rx = match store.subscribe(REQUEST_LOG_CHANNEL).await {
        Ok(rx) => rx,
        Err(err) => {
            tracing::error!(error = %err, "failed to subscribe to request log channel");
            return;
        }
    };

    let mut buffer: Vec<request_logs::Model> = Vec::with_capacity(config.flush_batch_size);
    let mut rollup: HashMap<(i64, i64), (i64, i64)> = HashMap::new();
    let mut flush_ticker = tokio_time::interval(config.flush_interval);
    flush_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut rollup_ticker = tokio_time::interval(config.rollup_persist_interval);
    rollup_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = rx.next() => {
                let Some((_, payload)) = event else {
                    flush(&storage, &mut buffer).await;
                    persist_rollup(&storage, &mut rollup).await;
                    break;
                };
                match serde_json::from_str::<RequestLogEvent>(&payload) {
                    Ok(event) => {
                        accumulate_rollup(&mut rollup, &event);
                        if let Some(model) = to_model(event) {
                            buffer.push(model);
                        }
                        if buffer.len() >= config.flush_batch_size {
                            flush(&storage, &mut buffer).await;
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "malformed request log event"),
                }
            }
            _ = flush_ticker.tick() => {
                if !buffer.is_empty() {
                    flush(&storage, &mut buffer).await;
                }
            }
            _ = rollup_ticker.tick() => {
                persist_rollup(&storage, &mut rollup).await;
            }
        }
    }
}

const SECONDS_PER_HOUR: i64 = 3600;

fn accumulate_rollup(rollup: &mut HashMap<(i64, i64), (i64, i64)>, event: &RequestLogEvent) {
    let hour = truncate_to_hour(event.created_at_unix);
    let entry = rollup.entry((event.group_id, hour)).or_insert((0, 0));
    entry.0 += 1;
    if event.error_kind.is_some() || event.status_code.map(|code| code >= 400).unwrap_or(false) {
        entry.1 += 1;
    }
}

fn truncate_to_hour(unix: i64) -> i64 {
    unix - unix.rem_euclid(SECONDS_PER_HOUR)
}

fn to_model(event: RequestLogEvent) -> Option<request_logs::Model> {
    let created_at = OffsetDateTime::from_unix_timestamp(event.created_at_unix).ok()?;
    Some(request_logs::Model {
        id: 0,
        group_id: event.group_id,
        key_id: event.key_id,
        model_name: event.model_name,
        relay_format: event.relay_format,
        status_code: event.status_code,
        error_kind: event.error_kind,
        duration_ms: event.duration_ms,
        created_at,
    })
}

async fn flush(storage: &Arc<dyn Storage>, buffer: &mut Vec<request_logs::Model>) {
    let rows = std::mem::take(buffer);
    if let Err(err) = storage.record_request_logs(rows).await {
        tracing::warn!(error = %err, "failed to flush request log batch");
    }
}

async fn persist_rollup(storage: &Arc<dyn Storage>, rollup: &mut HashMap<(i64, i64), (i64, i64)>) {
    if rollup.is_empty() {
        return;
    }
    let drained: Vec<_> = rollup.drain().collect();
    for ((group_id, hour_unix), (requests, failures)) in drained {
        let Ok(hour) = OffsetDateTime::from_unix_timestamp(hour_unix) else { continue };
        if let Err(err) = storage.upsert_hourly_stat(group_id, hour, requests, failures).await {
            tracing::warn!(error = %err, group_id, "failed to persist hourly rollup");
        }
    }
}

/// Deletes raw `request_logs` rows past retention (spec §4.9 "cron: prune
/// request logs"). `group_hourly_stats` is retained indefinitely — it is the
/// rollup these raw rows feed.
async fn prune_worker(storage: Arc<dyn Storage>, config: ObservabilityConfig) {
    let mut ticker = tokio_time::interval(config.prune_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let cutoff = OffsetDateTime::now_utc() - config.request_log_retention;
        match storage.prune_request_logs(cutoff).await {
            Ok(deleted) if deleted > 0 => tracing::info!(deleted, "pruned old request logs"),
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "failed to prune request logs"),
        }
    }
}
