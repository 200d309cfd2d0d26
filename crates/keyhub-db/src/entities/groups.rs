use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "groups")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub name: String,
    /// `standard` or `aggregate`.
    pub group_type: String,
    /// `openai`, `anthropic`, `gemini`, `codex`, `azure`, ...
    pub channel_type: String,
    pub enabled: bool,
    /// Lower ranks higher; >=1000 disables the group for Hub selection.
    pub sort: i32,
    pub test_model: Option<String>,
    /// `[{url, weight}]`.
    pub upstreams: Json,
    /// Typed options named in spec §6 (request_timeout, proxy_url, cc_support, ...).
    pub config: Json,
    /// `{source_model: {targets: [{model, weight}]}}`.
    pub model_redirect_rules_v2: Json,
    pub parent_group_id: Option<i64>,
    /// Aggregate-only extra model names.
    pub custom_model_names: Json,
    /// `{max_request_size_kb}` or null.
    pub preconditions: Option<Json>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
