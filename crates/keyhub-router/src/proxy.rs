//! The served routes (spec §6 "Wire surface"): the Hub path (`/hub/v1/*`),
//! model listing, and the direct per-group path (`/proxy/{group_name}/v1/*`).
//! Generalizes the shape of the teacher's `proxy_router`
//! (`gproxy-router/src/proxy.rs`) — thin axum handlers over one shared
//! engine call — onto this spec's Hub-selection-vs-direct split.

use std::sync::Arc;

use axum::body::Bytes as AxumBytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use keyhub_cluster::Node;
use keyhub_proxy::{capture, PipelineRequest, PipelineResponse, ResponseBody};
use keyhub_protocol::list_models::ModelListResponse;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::RouterError;
use crate::relay::{inbound_path_for, relay_format_for_direct_path, relay_format_for_hub_path};

pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/hub/v1/models", get(hub_models))
        .route("/hub/v1/chat/completions", post(hub_fixed))
        .route("/hub/v1/messages", post(hub_fixed))
        .route("/hub/v1/embeddings", post(hub_fixed))
        .route("/hub/v1/audio/transcriptions", post(hub_fixed))
        .route("/hub/v1/audio/speech", post(hub_fixed))
        .route("/hub/v1/images/generations", post(hub_fixed))
        .route("/hub/v1/images/edits", post(hub_fixed))
        .route("/hub/v1/moderations", post(hub_fixed))
        .route("/hub/v1/v1beta/models/{*name}", post(hub_gemini))
        .route("/proxy/{group_name}/v1/{*rest}", any(direct))
        .with_state(node)
}

fn access_key_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }
    headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(|s| s.trim().to_string())
}

async fn hub_models(State(node): State<Arc<Node>>) -> Response {
    let pool = node.hub.model_pool.get(&node.hub.groups);
    let mut names: Vec<String> = pool.keys().cloned().collect();
    names.sort();
    Json(ModelListResponse::new(names)).into_response()
}

/// Shared by every Hub route whose model lives in the request's path-fixed
/// route (everything except the Gemini `v1beta/models/{model}:{action}`
/// shape, which carries extra path state — see [`hub_gemini`]).
async fn hub_fixed(
    State(node): State<Arc<Node>>,
    axum::extract::OriginalUri(uri): axum::extract::OriginalUri,
    headers: HeaderMap,
    body: AxumBytes,
) -> Result<Response, RouterError> {
    let path = uri.path().trim_start_matches("/hub/v1/").to_string();
    serve_hub(node, &path, "", headers, Bytes::from(body)).await
}

async fn hub_gemini(
    State(node): State<Arc<Node>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: AxumBytes,
) -> Result<Response, RouterError> {
    serve_hub(node, "v1beta/models/", &name, headers, Bytes::from(body)).await
}

async fn serve_hub(
    node: Arc<Node>,
    route_path: &str,
    raw_suffix: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, RouterError> {
    let access_key = access_key_from_headers(&headers).ok_or_else(|| {
        RouterError(keyhub_proxy::PipelineError::new(keyhub_common::ErrorKind::Unauthorized, "missing hub access key"))
    })?;
    let access_key_hash = node.storage.hash_candidate(&access_key);

    let Some(relay_format) = relay_format_for_hub_path(route_path) else {
        return Err(RouterError(keyhub_proxy::PipelineError::not_found(format!("unrecognized hub path {route_path:?}"))));
    };
    let captured = capture::capture(body, capture::DEFAULT_RETRY_BUFFER_BYTES, capture::DEFAULT_HARD_CEILING_BYTES)?;
    let req = PipelineRequest {
        relay_format,
        inbound_path: inbound_path_for(relay_format, raw_suffix),
        body: captured.bytes,
        request_size_kb: captured.size_kb(),
        retryable: captured.retryable,
    };
    let priorities = node.settings.priorities();
    let settings = node.settings.hub_settings();
    let resp = node.pipeline.handle_hub_request(&access_key_hash, req, &priorities, &settings).await?;
    Ok(pipeline_response_into_axum(resp))
}

async fn direct(
    State(node): State<Arc<Node>>,
    Path((group_name, rest)): Path<(String, String)>,
    body: AxumBytes,
) -> Result<Response, RouterError> {
    let Some(relay_format) = relay_format_for_direct_path(&rest) else {
        return Err(RouterError(keyhub_proxy::PipelineError::not_found(format!("unrecognized group path {rest:?}"))));
    };
    let captured = capture::capture(Bytes::from(body), capture::DEFAULT_RETRY_BUFFER_BYTES, capture::DEFAULT_HARD_CEILING_BYTES)?;
    let req = PipelineRequest {
        relay_format,
        inbound_path: inbound_path_for(relay_format, &rest),
        body: captured.bytes,
        request_size_kb: captured.size_kb(),
        retryable: captured.retryable,
    };
    let resp = node.pipeline.handle_direct_request(&group_name, req).await?;
    Ok(pipeline_response_into_axum(resp))
}

/// Turns a completed [`PipelineResponse`] into the axum response forwarded
/// to the client, relaying a streamed body chunk-by-chunk (spec §4.8) rather
/// than collecting it, and dropping hop-by-hop/framing headers the upstream
/// response carries that no longer describe this relay's own framing (the
/// body may have been re-converted by `cc_support`, so a stale
/// `content-length` would be actively wrong).
fn pipeline_response_into_axum(resp: PipelineResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let is_stream = matches!(resp.body, ResponseBody::Stream(_));
    let mut builder = Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in &resp.headers {
            if is_hop_by_hop_or_framing_header(name) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                headers.append(name, value);
            }
        }
        if is_stream {
            headers.entry(axum::http::header::CACHE_CONTROL).or_insert(HeaderValue::from_static("no-cache"));
            headers.entry(HeaderName::from_static("x-accel-buffering")).or_insert(HeaderValue::from_static("no"));
        }
    }
    let body = match resp.body {
        ResponseBody::Bytes(bytes) => axum::body::Body::from(bytes),
        ResponseBody::Stream(rx) => axum::body::Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, std::convert::Infallible>)),
    };
    builder.body(body).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn is_hop_by_hop_or_framing_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length")
        || name.eq_ignore_ascii_case("transfer-encoding")
        || name.eq_ignore_ascii_case("connection")
        || name.eq_ignore_ascii_case("keep-alive")
        || name.eq_ignore_ascii_case("proxy-authenticate")
        || name.eq_ignore_ascii_case("proxy-authorization")
        || name.eq_ignore_ascii_case("te")
        || name.eq_ignore_ascii_case("trailer")
        || name.eq_ignore_ascii_case("upgrade")
}
