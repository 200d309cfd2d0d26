use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Hourly rollup of `request_logs`, retained far longer than the raw log
/// rows the cleanup cron prunes.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "group_hourly_stats")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub group_id: i64,
    pub hour: OffsetDateTime,
    pub requests: i64,
    pub failures: i64,
}

impl ActiveModelBehavior for ActiveModel {}
