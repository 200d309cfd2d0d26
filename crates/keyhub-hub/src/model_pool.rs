//! Model pool aggregation (spec §4.6): the `model_name -> channel_type ->
//! [ModelSource]` map the Hub resolves every selection against, plus its
//! adaptive-TTL memoization.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use keyhub_common::ChannelType;

use crate::group::{GroupCache, GroupRuntime};

#[derive(Debug, Clone)]
pub struct ModelSource {
    pub group_id: i64,
    pub group_name: String,
    pub channel_type: ChannelType,
    pub sort: i32,
    /// Weight used in the weighted-random tie-break (spec §4.6 step 6). For
    /// a standard group this is the matching redirect target's weight; an
    /// aggregate's custom model names default to 1 since there is no
    /// redirect-target weight to borrow (see DESIGN.md).
    pub base_weight: u32,
    pub is_aggregate: bool,
}

pub type ModelPoolMap = HashMap<String, HashMap<ChannelType, Vec<ModelSource>>>;

const BASE_TTL: Duration = Duration::from_secs(30);
const MAX_TTL: Duration = Duration::from_secs(120);
const TTL_MULTIPLIER: f64 = 1.2;
const HIT_THRESHOLD: u32 = 10;

struct CacheEntry {
    built_at: Instant,
    ttl: Duration,
    map: ModelPoolMap,
}

/// Memoized model pool with the adaptive TTL of spec §4.6: base 30s,
/// extended by ×1.2 per access past a 10-hit threshold, capped at 2 minutes.
/// Invalidated wholesale on any group/sub-group/settings change.
pub struct ModelPool {
    entry: ArcSwap<Option<CacheEntry>>,
    hits: AtomicU32,
    generation: AtomicU64,
}

impl Default for ModelPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelPool {
    pub fn new() -> Self {
        Self { entry: ArcSwap::from_pointee(None), hits: AtomicU32::new(0), generation: AtomicU64::new(0) }
    }

    /// Invalidates the cached pool immediately (spec §8 "no stale reads
    /// beyond 1 operation on the same node").
    pub fn invalidate(&self) {
        self.entry.store(std::sync::Arc::new(None));
        self.hits.store(0, Ordering::Relaxed);
        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current model pool, rebuilding from `group_cache` if the
    /// cached entry is absent or expired.
    pub fn get(&self, group_cache: &GroupCache) -> std::sync::Arc<ModelPoolMap> {
        if let Some(entry) = self.entry.load().as_ref() {
            if entry.built_at.elapsed() < entry.ttl {
                let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
                if hits > HIT_THRESHOLD {
                    self.extend_ttl(entry.ttl);
                }
                return std::sync::Arc::new(entry.map.clone());
            }
        }
        let map = build_model_pool(group_cache);
        self.entry.store(std::sync::Arc::new(Some(CacheEntry { built_at: Instant::now(), ttl: BASE_TTL, map: map.clone() })));
        self.hits.store(0, Ordering::Relaxed);
        std::sync::Arc::new(map)
    }

    fn extend_ttl(&self, current: Duration) {
        let next = current.mul_f64(TTL_MULTIPLIER).min(MAX_TTL);
        if let Some(entry) = self.entry.load().as_ref() {
            let refreshed = CacheEntry { built_at: entry.built_at, ttl: next, map: entry.map.clone() };
            self.entry.store(std::sync::Arc::new(Some(refreshed)));
        }
    }
}

/// Builds the model pool from scratch (spec §4.6 "Model pool"). Standard
/// groups contribute their redirect-rule source models directly; aggregate
/// groups contribute the intersection of their enabled sub-groups' models
/// plus `custom_model_names`, computed with a path-scoped visited set so a
/// true cycle fails empty for that aggregate without poisoning the rest of
/// the traversal (spec §9 "Cyclic group references").
pub fn build_model_pool(group_cache: &GroupCache) -> ModelPoolMap {
    let mut pool: ModelPoolMap = HashMap::new();
    for group in group_cache.list_enabled() {
        let models: HashSet<String> = match group.group_type {
            crate::group::GroupType::Standard => group.model_redirect_rules.keys().cloned().collect(),
            crate::group::GroupType::Aggregate => {
                let mut visited = HashSet::new();
                aggregate_models(&group, group_cache, &mut visited)
            }
        };
        for model in models {
            let weight = match group.group_type {
                crate::group::GroupType::Standard => group
                    .model_redirect_rules
                    .get(&model)
                    .and_then(|targets| targets.first())
                    .map(|t| t.weight)
                    .unwrap_or(1),
                crate::group::GroupType::Aggregate => 1,
            };
            pool.entry(model)
                .or_default()
                .entry(group.channel_type)
                .or_default()
                .push(ModelSource {
                    group_id: group.id,
                    group_name: group.name.clone(),
                    channel_type: group.channel_type,
                    sort: group.sort,
                    base_weight: weight,
                    is_aggregate: group.is_aggregate(),
                });
        }
    }
    // spec §8 "Sort determinism": ascending by sort, tie-break by group_id.
    for by_channel in pool.values_mut() {
        for sources in by_channel.values_mut() {
            sources.sort_by(|a, b| a.sort.cmp(&b.sort).then(a.group_id.cmp(&b.group_id)));
        }
    }
    pool
}

/// Returns the model-name intersection across `group`'s enabled sub-groups
/// plus its own `custom_model_names`. Empty on a detected cycle (spec §4.6:
/// "On cycle detection for models: return empty").
fn aggregate_models(
    group: &GroupRuntime,
    group_cache: &GroupCache,
    visited: &mut HashSet<i64>,
) -> HashSet<String> {
    if !visited.insert(group.id) {
        return HashSet::new();
    }
    let sub_groups = group_cache.enabled_sub_groups(group.id);
    let mut intersection: Option<HashSet<String>> = None;
    for edge in &sub_groups {
        let Some(sub) = group_cache.get_by_id(edge.sub_group_id) else { continue };
        if !sub.enabled {
            continue;
        }
        let sub_models: HashSet<String> = match sub.group_type {
            crate::group::GroupType::Standard => sub.model_redirect_rules.keys().cloned().collect(),
            crate::group::GroupType::Aggregate => aggregate_models(&sub, group_cache, visited),
        };
        intersection = Some(match intersection {
            Some(acc) => acc.intersection(&sub_models).cloned().collect(),
            None => sub_models,
        });
    }
    visited.remove(&group.id);
    let mut result = intersection.unwrap_or_default();
    result.extend(group.custom_model_names.iter().cloned());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyhub_db::entities::{group_sub_groups, groups};
    use time::OffsetDateTime;

    fn standard(id: i64, name: &str, sort: i32, models: serde_json::Value) -> groups::Model {
        groups::Model {
            id,
            name: name.to_string(),
            group_type: "standard".to_string(),
            channel_type: "openai".to_string(),
            enabled: true,
            sort,
            test_model: None,
            upstreams: serde_json::json!([]),
            config: serde_json::json!({}),
            model_redirect_rules_v2: models,
            parent_group_id: None,
            custom_model_names: serde_json::json!([]),
            preconditions: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    fn aggregate(id: i64, name: &str, custom: serde_json::Value) -> groups::Model {
        groups::Model {
            id,
            name: name.to_string(),
            group_type: "aggregate".to_string(),
            channel_type: "openai".to_string(),
            enabled: true,
            sort: 10,
            test_model: None,
            upstreams: serde_json::json!([]),
            config: serde_json::json!({}),
            model_redirect_rules_v2: serde_json::json!({}),
            parent_group_id: None,
            custom_model_names: custom,
            preconditions: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    fn redirect(model: &str) -> serde_json::Value {
        serde_json::json!({model: {"targets": [{"model": model, "weight": 1}]}})
    }

    #[test]
    fn standard_groups_contribute_union_of_source_models() {
        let cache = GroupCache::new();
        cache.reload(
            &[standard(1, "s1", 1, redirect("x")), standard(2, "s2", 1, redirect("y"))],
            &[],
        );
        let pool = build_model_pool(&cache);
        assert!(pool.contains_key("x"));
        assert!(pool.contains_key("y"));
    }

    #[test]
    fn aggregate_contributes_intersection_plus_custom_models() {
        let cache = GroupCache::new();
        let groups = vec![
            standard(1, "s1", 1, serde_json::json!({"x": {"targets":[{"model":"x","weight":1}]}, "y": {"targets":[{"model":"y","weight":1}]}})),
            standard(2, "s2", 1, serde_json::json!({"y": {"targets":[{"model":"y","weight":1}]}, "z": {"targets":[{"model":"z","weight":1}]}})),
            aggregate(100, "agg", serde_json::json!(["k"])),
        ];
        let edges = vec![
            group_sub_groups::Model { id: 1, group_id: 100, sub_group_id: 1, weight: 1 },
            group_sub_groups::Model { id: 2, group_id: 100, sub_group_id: 2, weight: 1 },
        ];
        cache.reload(&groups, &edges);
        let pool = build_model_pool(&cache);
        assert!(pool.get("y").unwrap().values().any(|v| v.iter().any(|s| s.group_id == 100)));
        assert!(pool.get("k").unwrap().values().any(|v| v.iter().any(|s| s.group_id == 100)));
        assert!(!pool.contains_key("x") || !pool["x"].values().any(|v| v.iter().any(|s| s.group_id == 100)));
    }

    #[test]
    fn self_referential_aggregate_fails_empty_not_panic() {
        let cache = GroupCache::new();
        let groups = vec![aggregate(100, "agg", serde_json::json!([]))];
        let edges = vec![group_sub_groups::Model { id: 1, group_id: 100, sub_group_id: 100, weight: 1 }];
        cache.reload(&groups, &edges);
        // Must not hang or panic; cyclic contribution is simply empty.
        let pool = build_model_pool(&cache);
        assert!(pool.is_empty() || !pool.values().any(|v| v.values().any(|s| s.iter().any(|x| x.group_id == 100))));
    }

    #[test]
    fn sources_sorted_ascending_by_sort_then_group_id() {
        let cache = GroupCache::new();
        let groups = vec![
            standard(2, "s2", 5, redirect("m")),
            standard(1, "s1", 5, redirect("m")),
        ];
        cache.reload(&groups, &[]);
        let pool = build_model_pool(&cache);
        let sources = &pool["m"][&ChannelType::Openai];
        assert_eq!(sources[0].group_id, 1);
        assert_eq!(sources[1].group_id, 2);
    }
}
