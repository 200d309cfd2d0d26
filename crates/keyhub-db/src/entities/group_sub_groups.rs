use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "group_sub_groups")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub group_id: i64,
    pub sub_group_id: i64,
    /// Weight 0 disables the edge without deleting it.
    pub weight: i32,
}

impl ActiveModelBehavior for ActiveModel {}
