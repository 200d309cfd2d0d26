//! Shared `Storage` no-op test double, used across this crate's unit tests
//! wherever a `DynamicWeight` needs an `Arc<dyn Storage>` but the test never
//! exercises persistence itself.

use keyhub_db::entities::{api_keys, dynamic_weight_metrics, group_sub_groups, groups, hub_access_keys};
use keyhub_db::Storage;
use time::OffsetDateTime;

pub struct NoopStorage;

#[async_trait::async_trait]
impl Storage for NoopStorage {
    async fn sync(&self) -> keyhub_db::StorageResult<()> {
        Ok(())
    }
    async fn load_snapshot(&self) -> keyhub_db::StorageResult<keyhub_db::StorageSnapshot> {
        Ok(Default::default())
    }
    async fn upsert_group(&self, _: groups::Model) -> keyhub_db::StorageResult<i64> {
        Ok(0)
    }
    async fn delete_group(&self, _: i64) -> keyhub_db::StorageResult<()> {
        Ok(())
    }
    async fn upsert_sub_group(&self, _: group_sub_groups::Model) -> keyhub_db::StorageResult<i64> {
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
    fn decrypt_hub_access_key(&self, _: &hub_access_keys::Model) -> keyhub_db::StorageResult<String> {
        Ok(String::new())
    }
    fn hash_candidate(&self, _: &str) -> String {
        String::new()
    }
    async fn upsert_priority(&self, _: &str, _: i64, _: i32) -> keyhub_db::StorageResult<()> {
        Ok(())
    }
    async fn persist_weight_metrics(&self, _: Vec<dynamic_weight_metrics::Model>) -> keyhub_db::StorageResult<()> {
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
