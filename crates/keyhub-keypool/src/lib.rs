pub mod pool;
pub mod restore;
pub mod types;

pub use pool::KeyProvider;
pub use restore::{ClusterNotifier, KeyValidator, RestoreWorker};
pub use types::{AcquiredKey, HubAccessKeyRecord, KeyPoolError, KeyStatus, Outcome, OutcomeReport};
