//! Process entry point (spec §4.9, §6): boots one node, serves the HTTP
//! surface, and runs the graceful-shutdown sequence on SIGINT/SIGTERM.
//! Mirrors the shape of the teacher's `apps/gproxy/src/main.rs` — bootstrap,
//! build the router, bind, serve — with the shutdown race this spec adds on
//! top.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let node = match keyhub_cluster::bootstrap_from_env().await {
        Ok(node) => node,
        Err(err) => {
            tracing::error!(error = %err, "startup failed");
            std::process::exit(1);
        }
    };

    let bind = format!("{}:{}", node.config.host, node.config.port);
    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %bind, "failed to bind listener");
            std::process::exit(1);
        }
    };
    tracing::info!(%bind, "listening");

    let graceful_timeout = Duration::from_secs(node.config.graceful_shutdown_timeout_secs);
    let database_dsn = node.config.database_dsn.clone();
    let store = node.store.clone();
    let clients = node.clients.clone();
    let db = node.db.clone();

    let node = Arc::new(node);
    let app = keyhub_router::router(node.clone());

    // spec §4.9 "drain the HTTP server within grace_total - 5s" — the 5s
    // floor is reserved for the background-stop phase below, so the drain
    // itself gets a hard budget distinct from (and raced against) a second
    // signal forcing immediate exit.
    let drain_budget = graceful_timeout.saturating_sub(Duration::from_secs(5));
    let drain_start = Instant::now();
    let serve = axum::serve(listener, app).with_graceful_shutdown(keyhub_cluster::shutdown_signal());
    tokio::select! {
        result = tokio::time::timeout(drain_budget, serve) => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "server error");
                }
                Err(_) => {
                    // Budget exceeded with connections still open: force-close
                    // them by exiting now rather than waiting indefinitely
                    // (spec: "1 ... on shutdown timeout exceeded").
                    tracing::error!("graceful drain exceeded its budget, force-closing remaining connections");
                    std::process::exit(1);
                }
            }
        }
        _ = keyhub_cluster::force_exit_on_second_signal() => {}
    }

    let remaining = graceful_timeout.saturating_sub(drain_start.elapsed());
    let outcome = keyhub_cluster::graceful_shutdown(&node.background, store, clients, db, &database_dsn, remaining).await;
    std::process::exit(outcome.exit_code);
}
