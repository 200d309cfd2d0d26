//! Pipeline error type (spec §7). Wraps the shared [`ErrorKind`] taxonomy
//! with a human-readable message; the `axum::response::IntoResponse` impl
//! lives in `keyhub-router` only, keeping this crate free of HTTP types —
//! the same split the teacher keeps between `gproxy-provider-core` and
//! `gproxy-router`.

use keyhub_common::ErrorKind;

#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<keyhub_hub::HubError> for PipelineError {
    fn from(value: keyhub_hub::HubError) -> Self {
        let kind = value.kind();
        Self::new(kind, value.to_string())
    }
}

impl From<keyhub_channels::ChannelError> for PipelineError {
    fn from(value: keyhub_channels::ChannelError) -> Self {
        Self::new(ErrorKind::Validation, value.to_string())
    }
}
