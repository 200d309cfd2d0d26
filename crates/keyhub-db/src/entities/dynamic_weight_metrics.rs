use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Keyed by `group_id` for standard groups, or by `(aggregate_group_id,
/// sub_group_id)` for a sub-group's contribution to an aggregate's health.
/// `deleted_at` implements the soft-delete spec §4.7 requires so that
/// removing and re-adding a sub-group restores its history.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "dynamic_weight_metrics")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub group_id: i64,
    pub aggregate_group_id: Option<i64>,
    pub sub_group_id: Option<i64>,
    pub requests: i64,
    pub failures: i64,
    pub last_failure_at: Option<OffsetDateTime>,
    pub deleted_at: Option<OffsetDateTime>,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
