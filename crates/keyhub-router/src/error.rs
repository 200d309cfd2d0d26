//! The one place in the workspace allowed to pair [`PipelineError`] with
//! axum's `IntoResponse` (spec §7); every crate below this one stays free of
//! HTTP types, the same split the teacher keeps between its provider core
//! and `gproxy-router`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use keyhub_proxy::PipelineError;

pub struct RouterError(pub PipelineError);

impl From<PipelineError> for RouterError {
    fn from(value: PipelineError) -> Self {
        Self(value)
    }
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({
            "error": {
                "kind": self.0.kind.to_string(),
                "message": self.0.message,
            }
        }));
        (status, body).into_response()
    }
}

/// Admin-surface errors (spec §6 admin mutation contract): storage failures
/// and payload validation both collapse to a small JSON error body, since no
/// admin caller needs the fine-grained [`keyhub_common::ErrorKind`] split
/// the proxy path cares about.
pub struct AdminError {
    pub status: StatusCode,
    pub message: String,
}

impl AdminError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: message.into() }
    }
}

impl From<keyhub_db::StorageError> for AdminError {
    fn from(value: keyhub_db::StorageError) -> Self {
        Self::internal(value.to_string())
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}
