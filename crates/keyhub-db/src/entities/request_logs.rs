use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Coarse per-attempt outcome log, not request/response bodies (spec §1
/// non-goal: "Request/response bodies are never persisted"). Feeds the
/// cron log-cleanup worker and the hourly rollup below.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "request_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub group_id: i64,
    pub key_id: Option<i64>,
    pub model_name: Option<String>,
    pub relay_format: String,
    pub status_code: Option<i32>,
    pub error_kind: Option<String>,
    pub duration_ms: i64,
    pub created_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
