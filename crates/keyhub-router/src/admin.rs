//! Admin surface (spec §4 "invalidation callbacks"): minimal CRUD over
//! groups, sub-group edges, API keys, Hub access keys, model priorities and
//! settings. Every mutation here follows the same three-step shape — write
//! through `Storage`, refresh this node's own in-memory caches immediately,
//! then `bump_settings_version` so every other node in the cluster catches
//! up — generalizing the route-table shape of the teacher's `admin_router`
//! (`gproxy-admin/src/router.rs`, `gproxy-router/src/admin.rs`) onto this
//! spec's Group/Key/HubAccessKey model.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use keyhub_cluster::Node;
use keyhub_db::entities::{group_sub_groups, groups};
use keyhub_db::{NewApiKey, NewHubAccessKey};
use serde::Deserialize;
use time::OffsetDateTime;

use crate::error::AdminError;

pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/admin/groups", get(list_groups).post(upsert_group))
        .route("/admin/groups/{id}", delete(delete_group))
        .route("/admin/groups/{id}/sub_groups", post(upsert_sub_group))
        .route("/admin/groups/{id}/sub_groups/{sub_group_id}", delete(remove_sub_group))
        .route("/admin/groups/{id}/keys", post(insert_api_key))
        .route("/admin/keys/{id}", delete(delete_api_key))
        .route("/admin/hub_access_keys", post(insert_hub_access_key))
        .route("/admin/hub_access_keys/{id}/enabled", put(set_hub_access_key_enabled))
        .route("/admin/priorities", put(upsert_priority))
        .route("/admin/settings/{key}", put(upsert_setting))
        .with_state(node)
}

/// Reloads every in-memory cache a group/sub-group/key mutation can affect,
/// then notifies the rest of the cluster (spec §4.9 "settings-version
/// propagation"). Re-reading the whole snapshot on every admin write is
/// simple and correct; admin traffic is orders of magnitude rarer than
/// request traffic, so it never needs the request-path's copy-on-publish
/// discipline applied to the write itself — only to its fan-out.
async fn reload_and_propagate(node: &Node) -> Result<(), AdminError> {
    let snapshot = node.storage.load_snapshot().await?;
    node.hub.reload(&snapshot).await;
    node.keys.reload(snapshot.api_keys.clone()).await;
    node.settings.rebuild(&snapshot);
    node.clients.close().await;
    if let Err(err) = keyhub_cluster::bump_settings_version(node.store.as_ref()).await {
        tracing::warn!(error = %err, "failed to publish settings version after admin mutation");
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct GroupPayload {
    #[serde(default)]
    id: i64,
    name: String,
    group_type: String,
    channel_type: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    sort: i32,
    #[serde(default)]
    test_model: Option<String>,
    #[serde(default = "default_array")]
    upstreams: serde_json::Value,
    #[serde(default = "default_object")]
    config: serde_json::Value,
    #[serde(default = "default_object")]
    model_redirect_rules_v2: serde_json::Value,
    #[serde(default)]
    parent_group_id: Option<i64>,
    #[serde(default = "default_array")]
    custom_model_names: serde_json::Value,
    #[serde(default)]
    preconditions: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

fn default_array() -> serde_json::Value {
    serde_json::json!([])
}

fn default_object() -> serde_json::Value {
    serde_json::json!({})
}

async fn list_groups(State(node): State<Arc<Node>>) -> Result<Json<serde_json::Value>, AdminError> {
    // `groups::Model` (a SeaORM entity) carries no `Serialize` impl, so this
    // projects the columns an admin caller actually needs rather than
    // growing the entity with a derive it would otherwise never use.
    let snapshot = node.storage.load_snapshot().await?;
    let rows: Vec<serde_json::Value> = snapshot
        .groups
        .iter()
        .map(|g| {
            serde_json::json!({
                "id": g.id,
                "name": g.name,
                "group_type": g.group_type,
                "channel_type": g.channel_type,
                "enabled": g.enabled,
                "sort": g.sort,
                "upstreams": g.upstreams,
                "config": g.config,
                "model_redirect_rules_v2": g.model_redirect_rules_v2,
                "parent_group_id": g.parent_group_id,
                "custom_model_names": g.custom_model_names,
                "preconditions": g.preconditions,
            })
        })
        .collect();
    Ok(Json(serde_json::json!(rows)))
}

async fn upsert_group(State(node): State<Arc<Node>>, Json(payload): Json<GroupPayload>) -> Result<Json<serde_json::Value>, AdminError> {
    let now = OffsetDateTime::now_utc();
    let model = groups::Model {
        id: payload.id,
        name: payload.name,
        group_type: payload.group_type,
        channel_type: payload.channel_type,
        enabled: payload.enabled,
        sort: payload.sort,
        test_model: payload.test_model,
        upstreams: payload.upstreams,
        config: payload.config,
        model_redirect_rules_v2: payload.model_redirect_rules_v2,
        parent_group_id: payload.parent_group_id,
        custom_model_names: payload.custom_model_names,
        preconditions: payload.preconditions,
        created_at: now,
        updated_at: now,
    };
    let id = node.storage.upsert_group(model).await?;
    reload_and_propagate(&node).await?;
    Ok(Json(serde_json::json!({ "id": id })))
}

async fn delete_group(State(node): State<Arc<Node>>, Path(id): Path<i64>) -> Result<(), AdminError> {
    node.storage.delete_group(id).await?;
    reload_and_propagate(&node).await
}

#[derive(Debug, Deserialize)]
struct SubGroupPayload {
    #[serde(default)]
    id: i64,
    sub_group_id: i64,
    weight: i32,
}

async fn upsert_sub_group(
    State(node): State<Arc<Node>>,
    Path(aggregate_id): Path<i64>,
    Json(payload): Json<SubGroupPayload>,
) -> Result<Json<serde_json::Value>, AdminError> {
    let edge = group_sub_groups::Model { id: payload.id, group_id: aggregate_id, sub_group_id: payload.sub_group_id, weight: payload.weight };
    let id = node.storage.upsert_sub_group(edge).await?;
    reload_and_propagate(&node).await?;
    Ok(Json(serde_json::json!({ "id": id })))
}

async fn remove_sub_group(State(node): State<Arc<Node>>, Path((aggregate_id, sub_group_id)): Path<(i64, i64)>) -> Result<(), AdminError> {
    node.storage.remove_sub_group(aggregate_id, sub_group_id).await?;
    reload_and_propagate(&node).await
}

#[derive(Debug, Deserialize)]
struct NewApiKeyPayload {
    plaintext: String,
}

async fn insert_api_key(
    State(node): State<Arc<Node>>,
    Path(group_id): Path<i64>,
    Json(payload): Json<NewApiKeyPayload>,
) -> Result<Json<serde_json::Value>, AdminError> {
    let id = node.storage.insert_api_key(NewApiKey { group_id, plaintext: payload.plaintext }).await?;
    reload_and_propagate(&node).await?;
    Ok(Json(serde_json::json!({ "id": id })))
}

async fn delete_api_key(State(node): State<Arc<Node>>, Path(id): Path<i64>) -> Result<(), AdminError> {
    node.storage.delete_api_key(id).await?;
    reload_and_propagate(&node).await
}

#[derive(Debug, Deserialize)]
struct NewHubAccessKeyPayload {
    name: String,
    plaintext: String,
    #[serde(default)]
    allowed_models: Vec<String>,
}

async fn insert_hub_access_key(
    State(node): State<Arc<Node>>,
    Json(payload): Json<NewHubAccessKeyPayload>,
) -> Result<Json<serde_json::Value>, AdminError> {
    let id = node
        .storage
        .insert_hub_access_key(NewHubAccessKey { name: payload.name, plaintext: payload.plaintext, allowed_models: payload.allowed_models })
        .await?;
    reload_and_propagate(&node).await?;
    Ok(Json(serde_json::json!({ "id": id })))
}

#[derive(Debug, Deserialize)]
struct EnabledPayload {
    enabled: bool,
}

async fn set_hub_access_key_enabled(
    State(node): State<Arc<Node>>,
    Path(id): Path<i64>,
    Json(payload): Json<EnabledPayload>,
) -> Result<(), AdminError> {
    node.storage.set_hub_access_key_enabled(id, payload.enabled).await?;
    let snapshot = node.storage.load_snapshot().await?;
    if let Some(row) = snapshot.hub_access_keys.iter().find(|row| row.id == id) {
        node.hub.access_keys.invalidate(&row.key_hash).await;
    }
    reload_and_propagate(&node).await
}

#[derive(Debug, Deserialize)]
struct PriorityPayload {
    model_name: String,
    group_id: i64,
    priority: i32,
}

async fn upsert_priority(State(node): State<Arc<Node>>, Json(payload): Json<PriorityPayload>) -> Result<(), AdminError> {
    node.storage.upsert_priority(&payload.model_name, payload.group_id, payload.priority).await?;
    reload_and_propagate(&node).await
}

async fn upsert_setting(State(node): State<Arc<Node>>, Path(key): Path<String>, Json(value): Json<serde_json::Value>) -> Result<(), AdminError> {
    node.storage.upsert_system_setting(&key, value).await?;
    reload_and_propagate(&node).await
}
