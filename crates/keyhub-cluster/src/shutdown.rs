//! Graceful shutdown (spec §4.9 "Graceful shutdown"): stop accepting
//! connections, drain in-flight HTTP within budget, stop background
//! services, close idle HTTP clients, close the shared store, then close
//! database pools — skipping the SQLite WAL checkpoint so a restart doesn't
//! pay for it twice. A second SIGINT/SIGTERM forces an immediate exit.
//!
//! The teacher's `apps/gproxy/src/main.rs` has no shutdown handling to draw
//! from directly; this module follows the same `tokio::signal`/`select!`
//! idiom the teacher already uses elsewhere for its background tickers
//! (`gproxy-storage/src/bus.rs`), applied to process lifecycle instead of a
//! write buffer.

use std::time::Duration;

use keyhub_proxy::HttpClientPool;
use keyhub_store::KvStore;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;

pub struct ShutdownOutcome {
    pub exit_code: i32,
}

async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Used as axum's `with_graceful_shutdown` future: resolves on the first
/// SIGINT/SIGTERM (spec §4.9 "stop accepting connections").
pub async fn shutdown_signal() {
    wait_for_signal().await;
    tracing::info!("shutdown signal received, draining connections");
}

/// Waits for a second SIGINT/SIGTERM after the first and forces an
/// immediate, non-graceful exit (spec §4.9 "a second signal forces
/// immediate exit"). Run this racing the rest of the shutdown sequence.
pub async fn force_exit_on_second_signal() {
    wait_for_signal().await;
    wait_for_signal().await;
    tracing::warn!("second shutdown signal received, forcing exit");
    std::process::exit(1);
}

/// Stops background workers, closes idle HTTP clients, the shared store,
/// and database pools, bounded by `remaining_budget` (spec §4.9: the total
/// grace period minus the time already spent draining HTTP connections).
/// Returns exit code 1 if the budget is exceeded, 0 otherwise.
pub async fn graceful_shutdown(
    background: &[JoinHandle<()>],
    store: Arc<dyn KvStore>,
    clients: Arc<HttpClientPool>,
    db: DatabaseConnection,
    database_dsn: &str,
    remaining_budget: Duration,
) -> ShutdownOutcome {
    let sequence = async {
        for handle in background {
            handle.abort();
        }
        clients.close().await;
        if let Err(err) = store.close().await {
            tracing::warn!(error = %err, "error closing shared store during shutdown");
        }
        close_database(db, database_dsn).await;
    };

    match tokio::time::timeout(remaining_budget, sequence).await {
        Ok(()) => ShutdownOutcome { exit_code: 0 },
        Err(_) => {
            tracing::error!("graceful shutdown exceeded its time budget, exiting forcefully");
            ShutdownOutcome { exit_code: 1 }
        }
    }
}

async fn close_database(db: DatabaseConnection, database_dsn: &str) {
    if database_dsn.starts_with("sqlite:") {
        // A `close()` here would force a WAL checkpoint; a bare drop leaves
        // the WAL file for the next start to replay instead, which is
        // cheaper than paying for the checkpoint on every shutdown.
        drop(db);
        return;
    }
    if let Err(err) = db.close().await {
        tracing::warn!(error = %err, "error closing database pool during shutdown");
    }
}
