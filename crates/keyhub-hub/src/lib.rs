//! Group Model & Routing Hub (spec §4.5, §4.6, §4.7): the group catalog,
//! model pool, Dynamic Weight scoring, access-key gate, and the selection
//! algorithm that ties them together for every `/hub/v1/*` request.

pub mod access_key;
pub mod error;
pub mod group;
pub mod model_pool;
pub mod selection;
pub mod weight;

#[cfg(test)]
pub(crate) mod test_support;

pub use access_key::AccessKeyGate;
pub use error::HubError;
pub use group::{GroupCache, GroupRuntime, GroupType, SubGroupEdge};
pub use model_pool::{ModelPool, ModelPoolMap, ModelSource};
pub use selection::{HubSettings, PriorityTable, Selector, SelectionInput, PRIORITY_DISABLED};
pub use weight::{DynamicWeight, MetricSnapshot};

use std::sync::Arc;

use keyhub_db::entities::{groups, hub_access_keys};
use keyhub_db::entities::group_sub_groups;
use keyhub_db::{Storage, StorageSnapshot};
use keyhub_keypool::KeyProvider;

/// Facade wiring the group cache, model pool, Dynamic Weight scorer, and
/// access-key gate for one node, mirroring the way the teacher's `AppState`
/// bundles its provider registry and snapshot behind one handle
/// (`gproxy-core/src/state/mod.rs`).
pub struct Hub {
    pub groups: Arc<GroupCache>,
    pub model_pool: Arc<ModelPool>,
    pub weight: Arc<DynamicWeight>,
    pub access_keys: AccessKeyGate,
    selector: Selector,
}

impl Hub {
    pub fn new(storage: Arc<dyn Storage>, keys: Arc<KeyProvider>) -> Self {
        let groups = Arc::new(GroupCache::new());
        let model_pool = Arc::new(ModelPool::new());
        let weight = DynamicWeight::new(storage);
        let access_keys = AccessKeyGate::new(keys);
        let selector = Selector::new(groups.clone(), model_pool.clone(), weight.clone());
        Self { groups, model_pool, weight, access_keys, selector }
    }

    /// Full reload from a storage snapshot (spec §4.5/§4.7: startup and
    /// settings-version catch-up both reload everything wholesale).
    pub async fn reload(&self, snapshot: &StorageSnapshot) {
        self.groups.reload(&snapshot.groups, &snapshot.group_sub_groups);
        self.weight.load(&snapshot.dynamic_weight_metrics).await;
        self.access_keys.reload(&snapshot.hub_access_keys).await;
        self.model_pool.invalidate();
    }

    pub async fn reload_groups(&self, groups: &[groups::Model], edges: &[group_sub_groups::Model]) {
        self.groups.reload(groups, edges);
        self.model_pool.invalidate();
    }

    pub async fn reload_access_keys(&self, rows: &[hub_access_keys::Model]) {
        self.access_keys.reload(rows).await;
    }

    pub async fn select(
        &self,
        input: SelectionInput<'_>,
        priorities: &PriorityTable,
        settings: &HubSettings,
    ) -> Result<Arc<GroupRuntime>, HubError> {
        self.selector.select(input, priorities, settings).await
    }

    /// Selection that skips groups already abandoned this request (spec §4.8).
    pub async fn select_excluding(
        &self,
        input: SelectionInput<'_>,
        priorities: &PriorityTable,
        settings: &HubSettings,
        excluded: &std::collections::HashSet<i64>,
    ) -> Result<Arc<GroupRuntime>, HubError> {
        self.selector.select_excluding(input, priorities, settings, excluded).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyhub_common::RelayFormat;
    use keyhub_store::MemoryStore;
    use time::OffsetDateTime;

    fn group_model(id: i64, name: &str, channel: &str) -> groups::Model {
        groups::Model {
            id,
            name: name.to_string(),
            group_type: "standard".to_string(),
            channel_type: channel.to_string(),
            enabled: true,
            sort: 1,
            test_model: None,
            upstreams: serde_json::json!([]),
            config: serde_json::json!({}),
            model_redirect_rules_v2: serde_json::json!({"gpt-4o": {"targets": [{"model": "gpt-4o", "weight": 1}]}}),
            parent_group_id: None,
            custom_model_names: serde_json::json!([]),
            preconditions: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn reload_then_select_round_trips() {
        let storage = Arc::new(test_support::NoopStorage);
        let keys = KeyProvider::new(storage.clone(), MemoryStore::new(), 3);
        let hub = Hub::new(storage, keys);
        hub.reload_groups(&[group_model(1, "g1", "openai")], &[]).await;
        let chosen = hub
            .select(
                SelectionInput { model_name: "gpt-4o", relay_format: RelayFormat::OpenaiChat, request_size_kb: 0 },
                &PriorityTable::new(),
                &HubSettings::default(),
            )
            .await
            .unwrap();
        assert_eq!(chosen.name, "g1");
    }
}
