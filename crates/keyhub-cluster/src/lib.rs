//! Cluster Coordination & Lifecycle (spec §4.9): node bootstrap (CLI/ENV/DB
//! merge, schema sync, leader/slave split), settings-version propagation,
//! background cron workers, and graceful shutdown — the glue `apps/keyhub`
//! wires into one process.

pub mod bootstrap;
pub mod settings;
pub mod shutdown;
pub mod workers;

pub use bootstrap::{bootstrap, bootstrap_from_env, CliArgs, Node};
pub use settings::{bump_settings_version, SettingsCache, SETTINGS_VERSION_CHANNEL};
pub use shutdown::{force_exit_on_second_signal, graceful_shutdown, shutdown_signal, ShutdownOutcome};
pub use workers::{spawn_observability, ObservabilityConfig, RequestLogEvent, RequestLogReporter, REQUEST_LOG_CHANNEL};
