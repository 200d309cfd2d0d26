pub mod crypto;
pub mod entities;
pub mod sea_storage;
pub mod storage;

pub use sea_storage::SeaStorage;
pub use storage::{NewApiKey, NewHubAccessKey, Storage, StorageError, StorageResult, StorageSnapshot};
