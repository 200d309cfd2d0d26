pub mod api_keys;
pub mod dynamic_weight_metrics;
pub mod group_hourly_stats;
pub mod group_sub_groups;
pub mod groups;
pub mod hub_access_keys;
pub mod hub_model_group_priorities;
pub mod hub_settings;
pub mod request_logs;
pub mod system_settings;

pub use api_keys::Entity as ApiKeys;
pub use dynamic_weight_metrics::Entity as DynamicWeightMetrics;
pub use group_hourly_stats::Entity as GroupHourlyStats;
pub use group_sub_groups::Entity as GroupSubGroups;
pub use groups::Entity as Groups;
pub use hub_access_keys::Entity as HubAccessKeys;
pub use hub_model_group_priorities::Entity as HubModelGroupPriorities;
pub use hub_settings::Entity as HubSettings;
pub use request_logs::Entity as RequestLogs;
pub use system_settings::Entity as SystemSettings;
