use async_trait::async_trait;
use keyhub_common::EncryptionKey;
use sea_orm::{ActiveValue, DatabaseConnection, EntityTrait};
use time::OffsetDateTime;

use crate::crypto::{decrypt, encrypt, key_hash};
use crate::entities::{
    api_keys, dynamic_weight_metrics, group_hourly_stats, group_sub_groups, groups,
    hub_access_keys, hub_model_group_priorities, hub_settings, request_logs, system_settings,
    ApiKeys, DynamicWeightMetrics, GroupHourlyStats, GroupSubGroups, Groups, HubAccessKeys,
    HubModelGroupPriorities, HubSettings, RequestLogs, SystemSettings,
};
use crate::storage::{NewApiKey, NewHubAccessKey, Storage, StorageResult, StorageSnapshot};

pub struct SeaStorage {
    db: DatabaseConnection,
    encryption_key: EncryptionKey,
}

impl SeaStorage {
    pub fn new(db: DatabaseConnection, encryption_key: EncryptionKey) -> Self {
        Self { db, encryption_key }
    }
}

#[async_trait]
impl Storage for SeaStorage {
    async fn sync(&self) -> StorageResult<()> {
        sea_orm::schema::sync::<groups::Entity>(&self.db).await?;
        sea_orm::schema::sync::<group_sub_groups::Entity>(&self.db).await?;
        sea_orm::schema::sync::<api_keys::Entity>(&self.db).await?;
        sea_orm::schema::sync::<hub_access_keys::Entity>(&self.db).await?;
        sea_orm::schema::sync::<hub_model_group_priorities::Entity>(&self.db).await?;
        sea_orm::schema::sync::<hub_settings::Entity>(&self.db).await?;
        sea_orm::schema::sync::<dynamic_weight_metrics::Entity>(&self.db).await?;
        sea_orm::schema::sync::<system_settings::Entity>(&self.db).await?;
        sea_orm::schema::sync::<request_logs::Entity>(&self.db).await?;
        sea_orm::schema::sync::<group_hourly_stats::Entity>(&self.db).await?;
        Ok(())
    }

    async fn load_snapshot(&self) -> StorageResult<StorageSnapshot> {
        Ok(StorageSnapshot {
            groups: Groups::find().all(&self.db).await?,
            group_sub_groups: GroupSubGroups::find().all(&self.db).await?,
            api_keys: ApiKeys::find().all(&self.db).await?,
            hub_access_keys: HubAccessKeys::find().all(&self.db).await?,
            priorities: HubModelGroupPriorities::find().all(&self.db).await?,
            hub_settings: HubSettings::find().all(&self.db).await?,
            dynamic_weight_metrics: DynamicWeightMetrics::find().all(&self.db).await?,
            system_settings: SystemSettings::find().all(&self.db).await?,
        })
    }

    async fn upsert_group(&self, model: groups::Model) -> StorageResult<i64> {
        let id = model.id;
        let active = groups::ActiveModel {
            id: ActiveValue::Set(id),
            name: ActiveValue::Set(model.name),
            group_type: ActiveValue::Set(model.group_type),
            channel_type: ActiveValue::Set(model.channel_type),
            enabled: ActiveValue::Set(model.enabled),
            sort: ActiveValue::Set(model.sort),
            test_model: ActiveValue::Set(model.test_model),
            upstreams: ActiveValue::Set(model.upstreams),
            config: ActiveValue::Set(model.config),
            model_redirect_rules_v2: ActiveValue::Set(model.model_redirect_rules_v2),
            parent_group_id: ActiveValue::Set(model.parent_group_id),
            custom_model_names: ActiveValue::Set(model.custom_model_names),
            preconditions: ActiveValue::Set(model.preconditions),
            created_at: ActiveValue::Set(model.created_at),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        Groups::insert(active)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(groups::Column::Id)
                    .update_columns([
                        groups::Column::Name,
                        groups::Column::GroupType,
                        groups::Column::ChannelType,
                        groups::Column::Enabled,
                        groups::Column::Sort,
                        groups::Column::TestModel,
                        groups::Column::Upstreams,
                        groups::Column::Config,
                        groups::Column::ModelRedirectRulesV2,
                        groups::Column::ParentGroupId,
                        groups::Column::CustomModelNames,
                        groups::Column::Preconditions,
                        groups::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(id)
    }

    async fn delete_group(&self, id: i64) -> StorageResult<()> {
        Groups::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    async fn upsert_sub_group(&self, edge: group_sub_groups::Model) -> StorageResult<i64> {
        let active = group_sub_groups::ActiveModel {
            id: ActiveValue::Set(edge.id),
            group_id: ActiveValue::Set(edge.group_id),
            sub_group_id: ActiveValue::Set(edge.sub_group_id),
            weight: ActiveValue::Set(edge.weight),
        };
        GroupSubGroups::insert(active)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(group_sub_groups::Column::Id)
                    .update_column(group_sub_groups::Column::Weight)
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(edge.id)
    }

    async fn remove_sub_group(&self, aggregate_id: i64, sub_group_id: i64) -> StorageResult<()> {
        use sea_orm::{ColumnTrait, QueryFilter};
        GroupSubGroups::delete_many()
            .filter(group_sub_groups::Column::GroupId.eq(aggregate_id))
            .filter(group_sub_groups::Column::SubGroupId.eq(sub_group_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn insert_api_key(&self, key: NewApiKey) -> StorageResult<i64> {
        let hash = key_hash(&self.encryption_key, &key.plaintext);
        let sealed = encrypt(&self.encryption_key, &key.plaintext)?;
        let active = api_keys::ActiveModel {
            id: ActiveValue::NotSet,
            group_id: ActiveValue::Set(key.group_id),
            key_hash: ActiveValue::Set(hash),
            key_value: ActiveValue::Set(sealed),
            status: ActiveValue::Set("active".to_string()),
            failure_count: ActiveValue::Set(0),
            last_used_at: ActiveValue::Set(None),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        let res = ApiKeys::insert(active).exec(&self.db).await?;
        Ok(res.last_insert_id)
    }

    async fn set_api_key_status(&self, id: i64, status: &str) -> StorageResult<()> {
        let active = api_keys::ActiveModel {
            id: ActiveValue::Set(id),
            status: ActiveValue::Set(status.to_string()),
            failure_count: ActiveValue::Set(0),
            ..Default::default()
        };
        ApiKeys::update(active).exec(&self.db).await?;
        Ok(())
    }

    async fn record_api_key_failure(&self, id: i64, failure_count: i32) -> StorageResult<()> {
        let active = api_keys::ActiveModel {
            id: ActiveValue::Set(id),
            failure_count: ActiveValue::Set(failure_count),
            ..Default::default()
        };
        ApiKeys::update(active).exec(&self.db).await?;
        Ok(())
    }

    async fn record_api_key_use(&self, id: i64, at: OffsetDateTime) -> StorageResult<()> {
        let active = api_keys::ActiveModel {
            id: ActiveValue::Set(id),
            last_used_at: ActiveValue::Set(Some(at)),
            ..Default::default()
        };
        ApiKeys::update(active).exec(&self.db).await?;
        Ok(())
    }

    async fn delete_api_key(&self, id: i64) -> StorageResult<()> {
        ApiKeys::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    fn decrypt_api_key(&self, key: &api_keys::Model) -> StorageResult<String> {
        Ok(decrypt(&self.encryption_key, &key.key_value)?)
    }

    async fn insert_hub_access_key(&self, key: NewHubAccessKey) -> StorageResult<i64> {
        let hash = key_hash(&self.encryption_key, &key.plaintext);
        let sealed = encrypt(&self.encryption_key, &key.plaintext)?;
        let active = hub_access_keys::ActiveModel {
            id: ActiveValue::NotSet,
            name: ActiveValue::Set(key.name),
            key_hash: ActiveValue::Set(hash),
            key_value: ActiveValue::Set(sealed),
            allowed_models: ActiveValue::Set(serde_json::to_value(key.allowed_models)?),
            enabled: ActiveValue::Set(true),
            usage_count: ActiveValue::Set(0),
            last_used_at: ActiveValue::Set(None),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        let res = HubAccessKeys::insert(active).exec(&self.db).await?;
        Ok(res.last_insert_id)
    }

    async fn set_hub_access_key_enabled(&self, id: i64, enabled: bool) -> StorageResult<()> {
        let active = hub_access_keys::ActiveModel {
            id: ActiveValue::Set(id),
            enabled: ActiveValue::Set(enabled),
            ..Default::default()
        };
        HubAccessKeys::update(active).exec(&self.db).await?;
        Ok(())
    }

    async fn record_hub_access_key_use(&self, id: i64, at: OffsetDateTime) -> StorageResult<()> {
        use sea_orm::{ColumnTrait, QueryFilter};
        if let Some(existing) = HubAccessKeys::find()
            .filter(hub_access_keys::Column::Id.eq(id))
            .one(&self.db)
            .await?
        {
            let active = hub_access_keys::ActiveModel {
                id: ActiveValue::Set(id),
                usage_count: ActiveValue::Set(existing.usage_count + 1),
                last_used_at: ActiveValue::Set(Some(at)),
                ..Default::default()
            };
            HubAccessKeys::update(active).exec(&self.db).await?;
        }
        Ok(())
    }

    fn decrypt_hub_access_key(&self, key: &hub_access_keys::Model) -> StorageResult<String> {
        Ok(decrypt(&self.encryption_key, &key.key_value)?)
    }

    fn hash_candidate(&self, plaintext: &str) -> String {
        key_hash(&self.encryption_key, plaintext)
    }

    async fn upsert_priority(&self, model_name: &str, group_id: i64, priority: i32) -> StorageResult<()> {
        use sea_orm::{ColumnTrait, QueryFilter};
        let existing = HubModelGroupPriorities::find()
            .filter(hub_model_group_priorities::Column::ModelName.eq(model_name))
            .filter(hub_model_group_priorities::Column::GroupId.eq(group_id))
            .one(&self.db)
            .await?;
        let active = hub_model_group_priorities::ActiveModel {
            id: existing.map(|e| ActiveValue::Set(e.id)).unwrap_or(ActiveValue::NotSet),
            model_name: ActiveValue::Set(model_name.to_string()),
            group_id: ActiveValue::Set(group_id),
            priority: ActiveValue::Set(priority),
        };
        HubModelGroupPriorities::insert(active)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(hub_model_group_priorities::Column::Id)
                    .update_column(hub_model_group_priorities::Column::Priority)
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn persist_weight_metrics(&self, rows: Vec<dynamic_weight_metrics::Model>) -> StorageResult<()> {
        for row in rows {
            let active = dynamic_weight_metrics::ActiveModel {
                id: ActiveValue::Set(row.id),
                group_id: ActiveValue::Set(row.group_id),
                aggregate_group_id: ActiveValue::Set(row.aggregate_group_id),
                sub_group_id: ActiveValue::Set(row.sub_group_id),
                requests: ActiveValue::Set(row.requests),
                failures: ActiveValue::Set(row.failures),
                last_failure_at: ActiveValue::Set(row.last_failure_at),
                deleted_at: ActiveValue::Set(row.deleted_at),
                updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            };
            DynamicWeightMetrics::insert(active)
                .on_conflict(
                    sea_orm::sea_query::OnConflict::column(dynamic_weight_metrics::Column::Id)
                        .update_columns([
                            dynamic_weight_metrics::Column::Requests,
                            dynamic_weight_metrics::Column::Failures,
                            dynamic_weight_metrics::Column::LastFailureAt,
                            dynamic_weight_metrics::Column::DeletedAt,
                            dynamic_weight_metrics::Column::UpdatedAt,
                        ])
                        .to_owned(),
                )
                .exec(&self.db)
                .await?;
        }
        Ok(())
    }

    async fn soft_delete_weight_metric(&self, aggregate_id: i64, sub_group_id: i64, at: OffsetDateTime) -> StorageResult<()> {
        use sea_orm::{ColumnTrait, QueryFilter};
        if let Some(existing) = DynamicWeightMetrics::find()
            .filter(dynamic_weight_metrics::Column::AggregateGroupId.eq(aggregate_id))
            .filter(dynamic_weight_metrics::Column::SubGroupId.eq(sub_group_id))
            .one(&self.db)
            .await?
        {
            let active = dynamic_weight_metrics::ActiveModel {
                id: ActiveValue::Set(existing.id),
                deleted_at: ActiveValue::Set(Some(at)),
                ..Default::default()
            };
            DynamicWeightMetrics::update(active).exec(&self.db).await?;
        }
        Ok(())
    }

    async fn upsert_system_setting(&self, key: &str, value: serde_json::Value) -> StorageResult<()> {
        use sea_orm::{ColumnTrait, QueryFilter};
        let existing = SystemSettings::find()
            .filter(system_settings::Column::Key.eq(key))
            .one(&self.db)
            .await?;
        let active = system_settings::ActiveModel {
            id: existing.map(|e| ActiveValue::Set(e.id)).unwrap_or(ActiveValue::NotSet),
            key: ActiveValue::Set(key.to_string()),
            value: ActiveValue::Set(value),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        SystemSettings::insert(active)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(system_settings::Column::Id)
                    .update_columns([system_settings::Column::Value, system_settings::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn record_request_logs(&self, rows: Vec<request_logs::Model>) -> StorageResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let actives = rows.into_iter().map(|row| request_logs::ActiveModel {
            id: ActiveValue::NotSet,
            group_id: ActiveValue::Set(row.group_id),
            key_id: ActiveValue::Set(row.key_id),
            model_name: ActiveValue::Set(row.model_name),
            relay_format: ActiveValue::Set(row.relay_format),
            status_code: ActiveValue::Set(row.status_code),
            error_kind: ActiveValue::Set(row.error_kind),
            duration_ms: ActiveValue::Set(row.duration_ms),
            created_at: ActiveValue::Set(row.created_at),
        });
        RequestLogs::insert_many(actives).exec(&self.db).await?;
        Ok(())
    }

    async fn prune_request_logs(&self, before: OffsetDateTime) -> StorageResult<u64> {
        use sea_orm::{ColumnTrait, QueryFilter};
        let res = RequestLogs::delete_many()
            .filter(request_logs::Column::CreatedAt.lt(before))
            .exec(&self.db)
            .await?;
        Ok(res.rows_affected)
    }

    async fn upsert_hourly_stat(&self, group_id: i64, hour: OffsetDateTime, requests: i64, failures: i64) -> StorageResult<()> {
        use sea_orm::{ColumnTrait, QueryFilter};
        let existing = GroupHourlyStats::find()
            .filter(group_hourly_stats::Column::GroupId.eq(group_id))
            .filter(group_hourly_stats::Column::Hour.eq(hour))
            .one(&self.db)
            .await?;
        let active = group_hourly_stats::ActiveModel {
            id: existing.as_ref().map(|e| ActiveValue::Set(e.id)).unwrap_or(ActiveValue::NotSet),
            group_id: ActiveValue::Set(group_id),
            hour: ActiveValue::Set(hour),
            requests: ActiveValue::Set(existing.as_ref().map(|e| e.requests).unwrap_or(0) + requests),
            failures: ActiveValue::Set(existing.map(|e| e.failures).unwrap_or(0) + failures),
        };
        GroupHourlyStats::insert(active)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(group_hourly_stats::Column::Id)
                    .update_columns([group_hourly_stats::Column::Requests, group_hourly_stats::Column::Failures])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }
}
