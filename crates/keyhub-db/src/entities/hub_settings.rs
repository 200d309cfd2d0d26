use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// One row per named Hub setting (`max_retries`, `retry_delay`,
/// `health_threshold`, `enable_priority`, `only_aggregate_groups`, ...),
/// matching the process-wide `SystemSetting` shape in spec §3 but scoped to
/// Hub routing behavior rather than arbitrary options.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "hub_settings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub key: String,
    pub value: Json,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
