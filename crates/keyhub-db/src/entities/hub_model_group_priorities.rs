use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "hub_model_group_priorities")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub model_name: String,
    pub group_id: i64,
    /// 1..999 usable, 1000 reserved for "disabled".
    pub priority: i32,
}

impl ActiveModelBehavior for ActiveModel {}
