use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub group_id: i64,
    /// Deterministic keyed hash, unique within a group, used for lookups.
    pub key_hash: String,
    /// AES-256-GCM ciphertext; never decrypted except to build an upstream request.
    pub key_value: Vec<u8>,
    /// `active` or `invalid`; transitions only active<->invalid.
    pub status: String,
    pub failure_count: i32,
    pub last_used_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "group_id", to = "id", on_delete = "Cascade")]
    pub group: HasOne<super::groups::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
