//! Hub model-routing selection (spec §4.6 "Selection", "Priority override").
//!
//! The weighted-random tie-break and `effective_weight` computation are
//! grounded in the weight-gated routing design of
//! `examples/other_examples/.../deployment.rs` (`DeploymentConfig::weight`),
//! generalized with the health-score multiplier this spec requires.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use keyhub_channels::compat::{is_compatible, requires_cc_support};
use keyhub_common::{ChannelType, RelayFormat};
use rand::Rng;
use time::OffsetDateTime;

use crate::error::HubError;
use crate::group::{GroupCache, GroupRuntime};
use crate::model_pool::{ModelPool, ModelSource};
use crate::weight::DynamicWeight;

/// `(model_name, group_id) -> priority`, 1..999 usable, 1000 reserved for
/// "disabled" (spec §4.6 "Priority override").
pub type PriorityTable = HashMap<(String, i64), i32>;

pub const PRIORITY_DISABLED: i32 = 1000;

pub struct HubSettings {
    pub health_threshold: f64,
    pub enable_priority: bool,
    pub only_aggregate_groups: bool,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            health_threshold: keyhub_common::GlobalConfig::DEFAULT_HEALTH_THRESHOLD,
            enable_priority: false,
            only_aggregate_groups: false,
        }
    }
}

pub struct SelectionInput<'a> {
    pub model_name: &'a str,
    pub relay_format: RelayFormat,
    pub request_size_kb: u64,
}

pub struct Selector {
    group_cache: Arc<GroupCache>,
    model_pool: Arc<ModelPool>,
    dynamic_weight: Arc<DynamicWeight>,
}

impl Selector {
    pub fn new(group_cache: Arc<GroupCache>, model_pool: Arc<ModelPool>, dynamic_weight: Arc<DynamicWeight>) -> Self {
        Self { group_cache, model_pool, dynamic_weight }
    }

    /// Resolves `(model_name, relay_format, request_size_kb)` to one group,
    /// implementing the seven steps of spec §4.6 "Selection" in order.
    pub async fn select(
        &self,
        input: SelectionInput<'_>,
        priorities: &PriorityTable,
        settings: &HubSettings,
    ) -> Result<Arc<GroupRuntime>, HubError> {
        self.select_excluding(input, priorities, settings, &HashSet::new()).await
    }

    /// Same as [`Selector::select`], but skips any group id in `excluded` —
    /// used by the Pipeline to try the next-best group after one abandons
    /// the request outright (spec §4.8 "Hub path": `abandon_group` re-enters
    /// selection rather than failing the whole request).
    pub async fn select_excluding(
        &self,
        input: SelectionInput<'_>,
        priorities: &PriorityTable,
        settings: &HubSettings,
        excluded: &HashSet<i64>,
    ) -> Result<Arc<GroupRuntime>, HubError> {
        let pool = self.model_pool.get(&self.group_cache);
        let Some(by_channel) = pool.get(input.model_name) else {
            return Err(HubError::NoCompatibleGroup(input.model_name.to_string()));
        };

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let mut candidates: Vec<ScoredSource> = Vec::new();
        for sources in by_channel.values() {
            for source in sources {
                let Some(group) = self.group_cache.get_by_id(source.group_id) else { continue };
                if excluded.contains(&group.id) {
                    continue;
                }
                if !group.hub_eligible() {
                    continue;
                }
                if settings.only_aggregate_groups && !group.is_aggregate() {
                    continue;
                }
                if !is_compatible(input.relay_format, source.channel_type) {
                    continue;
                }
                if requires_cc_support(input.relay_format, source.channel_type) && !group.config.cc_support {
                    continue;
                }
                let health = self.health_score(&group, now).await;
                if health < settings.health_threshold {
                    continue;
                }
                if group.is_aggregate() && input.request_size_kb > 0 {
                    match &group.preconditions {
                        Some(p) if p.exceeds(input.request_size_kb) => continue,
                        Some(_) => {}
                        None => {
                            // Preconditions row unavailable: fail open (spec §4.6 step 4).
                            tracing::debug!(group = %group.name, "no precondition row, failing open on size gate");
                        }
                    }
                }
                let rank = if settings.enable_priority {
                    priorities
                        .get(&(input.model_name.to_string(), group.id))
                        .copied()
                        .unwrap_or(group.sort)
                } else {
                    group.sort
                };
                if rank >= PRIORITY_DISABLED {
                    continue;
                }
                candidates.push(ScoredSource {
                    group,
                    channel_type: source.channel_type,
                    base_weight: source.base_weight,
                    health,
                    rank,
                    native: source.channel_type == input.relay_format.native_channel(),
                });
            }
        }

        if candidates.is_empty() {
            return Err(HubError::NoCompatibleGroup(input.model_name.to_string()));
        }

        // Step 5: partition native vs. compatible; step 7: fall back if no native winner.
        let native: Vec<&ScoredSource> = candidates.iter().filter(|c| c.native).collect();
        if let Some(chosen) = pick_from_set(&native) {
            return Ok(chosen.group.clone());
        }
        let compatible: Vec<&ScoredSource> = candidates.iter().filter(|c| !c.native).collect();
        pick_from_set(&compatible).map(|c| c.group.clone()).ok_or_else(|| HubError::NoCompatibleGroup(input.model_name.to_string()))
    }

    async fn health_score(&self, group: &GroupRuntime, now: i64) -> f64 {
        if group.is_aggregate() {
            let sub_ids: Vec<i64> = self
                .group_cache
                .enabled_sub_groups(group.id)
                .into_iter()
                .filter(|e| self.group_cache.get_by_id(e.sub_group_id).map(|g| g.enabled).unwrap_or(false))
                .map(|e| e.sub_group_id)
                .collect();
            self.dynamic_weight.aggregate_score(group.id, &sub_ids, now).await
        } else {
            self.dynamic_weight.group_score(group.id, now).await
        }
    }
}

struct ScoredSource {
    group: Arc<GroupRuntime>,
    #[allow(dead_code)]
    channel_type: ChannelType,
    base_weight: u32,
    health: f64,
    rank: i32,
    native: bool,
}

/// Step 6: take the minimum `rank` within `set`, then weighted-random among
/// ties using `effective_weight = round1(base_weight * health) clamped >= 0.1`.
fn pick_from_set<'a>(set: &[&'a ScoredSource]) -> Option<&'a ScoredSource> {
    let min_rank = set.iter().map(|c| c.rank).min()?;
    let tied: Vec<&&ScoredSource> = set.iter().filter(|c| c.rank == min_rank).collect();
    if tied.len() == 1 {
        return Some(tied[0]);
    }
    let weights: Vec<f64> = tied.iter().map(|c| effective_weight(c.base_weight, c.health)).collect();
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Some(tied[0]);
    }
    let mut pick = rand::rng().random_range(0.0..total);
    for (idx, w) in weights.iter().enumerate() {
        if pick < *w {
            return Some(tied[idx]);
        }
        pick -= w;
    }
    tied.last().copied()
}

fn effective_weight(base_weight: u32, health: f64) -> f64 {
    let raw = base_weight as f64 * health;
    let rounded = (raw * 10.0).round() / 10.0;
    rounded.max(0.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::GroupCache;
    use crate::model_pool::ModelPool;
    use keyhub_db::entities::groups;
    use time::OffsetDateTime;

    fn group_model(id: i64, name: &str, channel: &str, sort: i32, cc_support: bool) -> groups::Model {
        groups::Model {
            id,
            name: name.to_string(),
            group_type: "standard".to_string(),
            channel_type: channel.to_string(),
            enabled: true,
            sort,
            test_model: None,
            upstreams: serde_json::json!([]),
            config: serde_json::json!({"cc_support": cc_support}),
            model_redirect_rules_v2: serde_json::json!({"m": {"targets": [{"model": "m", "weight": 1}]}}),
            parent_group_id: None,
            custom_model_names: serde_json::json!([]),
            preconditions: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    async fn selector_with(groups: Vec<groups::Model>) -> (Selector, Arc<GroupCache>) {
        let cache = Arc::new(GroupCache::new());
        cache.reload(&groups, &[]);
        let pool = Arc::new(ModelPool::new());
        let weight = DynamicWeight::new(Arc::new(crate::test_support::NoopStorage));
        (Selector::new(cache.clone(), pool, weight), cache)
    }

    #[tokio::test]
    async fn native_channel_wins_over_lower_sort_compatible_channel() {
        // scenario 3: g_anthropic has lower sort but openai is native to openai_chat.
        let (selector, _cache) = selector_with(vec![
            group_model(1, "g_openai", "openai", 10, false),
            group_model(2, "g_anthropic", "anthropic", 5, false),
        ])
        .await;
        let chosen = selector
            .select(
                SelectionInput { model_name: "m", relay_format: RelayFormat::OpenaiChat, request_size_kb: 0 },
                &PriorityTable::new(),
                &HubSettings::default(),
            )
            .await
            .unwrap();
        assert_eq!(chosen.name, "g_openai");
    }

    #[tokio::test]
    async fn disabled_via_sort_is_never_selected() {
        let (selector, _cache) = selector_with(vec![group_model(1, "g1", "openai", 1000, false)]).await;
        let err = selector
            .select(
                SelectionInput { model_name: "m", relay_format: RelayFormat::OpenaiChat, request_size_kb: 0 },
                &PriorityTable::new(),
                &HubSettings::default(),
            )
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn claude_relay_requires_cc_support_on_non_anthropic() {
        let (selector, _cache) = selector_with(vec![group_model(1, "g1", "openai", 1, false)]).await;
        let err = selector
            .select(
                SelectionInput { model_name: "m", relay_format: RelayFormat::Claude, request_size_kb: 0 },
                &PriorityTable::new(),
                &HubSettings::default(),
            )
            .await;
        assert!(err.is_err());

        let (selector, _cache) = selector_with(vec![group_model(1, "g1", "openai", 1, true)]).await;
        let chosen = selector
            .select(
                SelectionInput { model_name: "m", relay_format: RelayFormat::Claude, request_size_kb: 0 },
                &PriorityTable::new(),
                &HubSettings::default(),
            )
            .await
            .unwrap();
        assert_eq!(chosen.name, "g1");
    }

    #[test]
    fn effective_weight_clamps_to_minimum() {
        assert_eq!(effective_weight(1, 0.0), 0.1);
    }

    #[test]
    fn effective_weight_rounds_to_one_decimal() {
        assert_eq!(effective_weight(3, 0.33), 1.0);
    }
}
