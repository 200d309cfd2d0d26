//! Group cache and child-group lifecycle (spec §4.5).
//!
//! `GroupCache` is the copy-on-publish snapshot pattern the teacher uses for
//! `AppState::providers` (`gproxy-core/src/state/mod.rs`): an `ArcSwap` over
//! a fully-built map, swapped wholesale on every invalidation event instead
//! of mutated in place. Generalized here from one map (`name -> provider`)
//! to two (`name ->` and `id ->`) since the Hub needs both lookups (spec
//! §4.6's model pool indexes by model name; priority overrides and sub-group
//! edges reference group ids).

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use keyhub_common::{ChannelType, GroupConfig, GroupPreconditions};
use keyhub_db::entities::{group_sub_groups, groups};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupType {
    Standard,
    Aggregate,
}

impl GroupType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "standard" => Some(GroupType::Standard),
            "aggregate" => Some(GroupType::Aggregate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelRedirectTarget {
    pub model: String,
    pub weight: u32,
}

#[derive(Debug, Clone)]
pub struct UpstreamEndpoint {
    pub url: String,
    pub weight: u32,
}

/// In-memory, already-parsed view of one `groups` row, rebuilt whenever the
/// group cache is rebuilt. Everything the Hub and Pipeline read on the hot
/// path lives here so neither has to re-parse `Json` columns per request.
#[derive(Debug, Clone)]
pub struct GroupRuntime {
    pub id: i64,
    pub name: String,
    pub group_type: GroupType,
    pub channel_type: ChannelType,
    pub enabled: bool,
    pub sort: i32,
    pub test_model: Option<String>,
    pub upstreams: Vec<UpstreamEndpoint>,
    pub config: GroupConfig,
    pub model_redirect_rules: HashMap<String, Vec<ModelRedirectTarget>>,
    pub parent_group_id: Option<i64>,
    pub custom_model_names: Vec<String>,
    pub preconditions: Option<GroupPreconditions>,
}

impl GroupRuntime {
    pub fn from_model(model: &groups::Model) -> Option<Self> {
        let group_type = GroupType::parse(&model.group_type)?;
        let channel_type = ChannelType::parse(&model.channel_type)?;
        let upstreams = serde_json::from_value::<Vec<UpstreamEndpointRaw>>(model.upstreams.clone())
            .unwrap_or_default()
            .into_iter()
            .map(|u| UpstreamEndpoint { url: u.url, weight: u.weight.max(1) })
            .collect();
        let rules = serde_json::from_value::<HashMap<String, RedirectRuleRaw>>(
            model.model_redirect_rules_v2.clone(),
        )
        .unwrap_or_default()
        .into_iter()
        .map(|(source, raw)| {
            let targets = raw
                .targets
                .into_iter()
                .map(|t| ModelRedirectTarget { model: t.model, weight: t.weight.max(1) })
                .collect();
            (source, targets)
        })
        .collect();
        let custom_model_names =
            serde_json::from_value::<Vec<String>>(model.custom_model_names.clone()).unwrap_or_default();
        let preconditions = model
            .preconditions
            .as_ref()
            .and_then(GroupPreconditions::from_json);
        Some(Self {
            id: model.id,
            name: model.name.clone(),
            group_type,
            channel_type,
            enabled: model.enabled,
            sort: model.sort,
            test_model: model.test_model.clone(),
            upstreams,
            config: GroupConfig::from_json(&model.config),
            model_redirect_rules: rules,
            parent_group_id: model.parent_group_id,
            custom_model_names,
            preconditions,
        })
    }

    /// Whether this group is Hub-selectable at all (spec §4.6 step 2:
    /// `enabled && sort<1000`).
    pub fn hub_eligible(&self) -> bool {
        self.enabled && self.sort < 1000
    }

    pub fn is_aggregate(&self) -> bool {
        self.group_type == GroupType::Aggregate
    }
}

#[derive(Debug, serde::Deserialize)]
struct UpstreamEndpointRaw {
    url: String,
    #[serde(default = "default_weight")]
    weight: u32,
}

#[derive(Debug, serde::Deserialize)]
struct RedirectRuleRaw {
    targets: Vec<RedirectTargetRaw>,
}

#[derive(Debug, serde::Deserialize)]
struct RedirectTargetRaw {
    model: String,
    #[serde(default = "default_weight")]
    weight: u32,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Clone)]
pub struct SubGroupEdge {
    pub aggregate_id: i64,
    pub sub_group_id: i64,
    /// Weight 0 disables the edge without deleting it (spec §3).
    pub weight: i32,
}

impl SubGroupEdge {
    pub fn enabled(&self) -> bool {
        self.weight > 0
    }
}

/// Read-heavy group catalog, rebuilt wholesale on every invalidation event
/// (group/sub-group/settings mutation — spec §4.5, §8 "cache invalidation").
pub struct GroupCache {
    by_name: ArcSwap<HashMap<String, Arc<GroupRuntime>>>,
    by_id: ArcSwap<HashMap<i64, Arc<GroupRuntime>>>,
    sub_groups: ArcSwap<Vec<SubGroupEdge>>,
}

impl Default for GroupCache {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupCache {
    pub fn new() -> Self {
        Self {
            by_name: ArcSwap::from_pointee(HashMap::new()),
            by_id: ArcSwap::from_pointee(HashMap::new()),
            sub_groups: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Rebuilds both lookup maps and the sub-group edge list from a full
    /// storage snapshot. Called at startup and whenever a node observes a
    /// group/sub-group mutation over `keyhub-store` pub/sub.
    pub fn reload(&self, groups: &[groups::Model], edges: &[group_sub_groups::Model]) {
        let mut by_name = HashMap::with_capacity(groups.len());
        let mut by_id = HashMap::with_capacity(groups.len());
        for model in groups {
            let Some(runtime) = GroupRuntime::from_model(model) else {
                tracing::warn!(group_id = model.id, "skipping group with unrecognized type/channel");
                continue;
            };
            let arc = Arc::new(runtime);
            by_name.insert(arc.name.clone(), arc.clone());
            by_id.insert(arc.id, arc);
        }
        let sub_groups = edges
            .iter()
            .map(|e| SubGroupEdge { aggregate_id: e.group_id, sub_group_id: e.sub_group_id, weight: e.weight })
            .collect();
        self.by_name.store(Arc::new(by_name));
        self.by_id.store(Arc::new(by_id));
        self.sub_groups.store(Arc::new(sub_groups));
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<GroupRuntime>> {
        self.by_name.load().get(name).cloned()
    }

    pub fn get_by_id(&self, id: i64) -> Option<Arc<GroupRuntime>> {
        self.by_id.load().get(&id).cloned()
    }

    pub fn list_enabled(&self) -> Vec<Arc<GroupRuntime>> {
        self.by_id.load().values().filter(|g| g.enabled).cloned().collect()
    }

    /// Sub-group edges for `aggregate_id`, enabled (`weight>0`) only.
    pub fn enabled_sub_groups(&self, aggregate_id: i64) -> Vec<SubGroupEdge> {
        self.sub_groups
            .load()
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id && e.enabled())
            .cloned()
            .collect()
    }
}

/// Rewrites a child group's upstream `host:port` to this node's own listen
/// address (spec §4.5: "Upstreams of child groups are synchronized with the
/// server's listen port on startup ... so that a slave's child groups always
/// point at the slave itself"). Only `parent_group_id.is_some()` groups are
/// child groups; standalone groups are left untouched.
pub fn sync_child_group_upstreams(
    upstreams: &[UpstreamEndpoint],
    bind_host: &str,
    bind_port: u16,
) -> Vec<UpstreamEndpoint> {
    upstreams
        .iter()
        .map(|u| UpstreamEndpoint {
            url: rewrite_host_port(&u.url, bind_host, bind_port),
            weight: u.weight,
        })
        .collect()
}

fn rewrite_host_port(url: &str, host: &str, port: u16) -> String {
    let Some((scheme_sep, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let (_old_authority, path) = rest.split_once('/').map(|(a, p)| (a, Some(p))).unwrap_or((rest, None));
    let scheme = &url[..scheme_sep];
    match path {
        Some(path) => format!("{scheme}://{host}:{port}/{path}"),
        None => format!("{scheme}://{host}:{port}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn group_model(id: i64, name: &str, group_type: &str, channel: &str) -> groups::Model {
        groups::Model {
            id,
            name: name.to_string(),
            group_type: group_type.to_string(),
            channel_type: channel.to_string(),
            enabled: true,
            sort: 10,
            test_model: Some("gpt-4o-mini".to_string()),
            upstreams: serde_json::json!([{"url": "https://api.example.com", "weight": 1}]),
            config: serde_json::json!({}),
            model_redirect_rules_v2: serde_json::json!({"alpha": {"targets": [{"model": "gpt-4o", "weight": 1}]}}),
            parent_group_id: None,
            custom_model_names: serde_json::json!([]),
            preconditions: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn reload_indexes_by_both_name_and_id() {
        let cache = GroupCache::new();
        cache.reload(&[group_model(1, "g1", "standard", "openai")], &[]);
        assert_eq!(cache.get_by_name("g1").unwrap().id, 1);
        assert_eq!(cache.get_by_id(1).unwrap().name, "g1");
    }

    #[test]
    fn unrecognized_group_type_is_skipped_not_fatal() {
        let cache = GroupCache::new();
        cache.reload(&[group_model(1, "g1", "bogus", "openai")], &[]);
        assert!(cache.get_by_name("g1").is_none());
    }

    #[test]
    fn sub_group_edges_with_zero_weight_are_excluded() {
        let cache = GroupCache::new();
        let edges = vec![
            group_sub_groups::Model { id: 1, group_id: 100, sub_group_id: 1, weight: 1 },
            group_sub_groups::Model { id: 2, group_id: 100, sub_group_id: 2, weight: 0 },
        ];
        cache.reload(&[], &edges);
        let enabled = cache.enabled_sub_groups(100);
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].sub_group_id, 1);
    }

    #[test]
    fn child_group_upstream_host_port_rewritten() {
        let upstreams = vec![UpstreamEndpoint { url: "http://old-host:9999/v1".to_string(), weight: 1 }];
        let rewritten = sync_child_group_upstreams(&upstreams, "127.0.0.1", 8080);
        assert_eq!(rewritten[0].url, "http://127.0.0.1:8080/v1");
    }
}
