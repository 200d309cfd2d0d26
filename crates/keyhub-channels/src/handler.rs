//! Generalizes the teacher's `UpstreamProvider` trait
//! (`gproxy-provider-core/src/provider/mod.rs`) to the capability set this
//! spec names in §4.4: `extract_model`, `rewrite_request`,
//! `classify_response`, `relay_format`. Narrower than the teacher's trait —
//! no OAuth/local-response/credential-upgrade hooks, since Groups here carry
//! no consumer-OAuth upstreams — but the same "default returns Unsupported"
//! shape for capabilities a given handler doesn't implement.

use bytes::Bytes;
use keyhub_common::{ChannelType, ErrorKind, RelayFormat};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("{0} does not support this operation")]
    Unsupported(&'static str),
    #[error("malformed request body: {0}")]
    Malformed(String),
}

/// An upstream-bound request, already rewritten for the target channel.
#[derive(Debug, Clone)]
pub struct RewrittenRequest {
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

#[async_trait::async_trait]
pub trait ChannelHandler: Send + Sync {
    fn channel_type(&self) -> ChannelType;
    fn relay_format(&self) -> RelayFormat;

    /// Reads the model name out of a captured request body/path. Gemini's
    /// model lives in the path, not the body — handler-owned so adding a new
    /// shape never touches the Pipeline.
    fn extract_model(&self, body: &Value, path: &str) -> Result<String, ChannelError> {
        let _ = path;
        body.get("model")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ChannelError::Malformed("missing \"model\" field".to_string()))
    }

    /// Builds the upstream request: rewrites the model (after Hub resolution
    /// or redirect rules), injects the credential, and rewrites the path to
    /// this handler's native endpoint shape.
    fn rewrite_request(
        &self,
        body: Value,
        rewritten_model: &str,
        upstream_base: &str,
        api_key: &str,
    ) -> Result<RewrittenRequest, ChannelError>;

    /// Classifies a completed upstream response into the taxonomy the Pipeline
    /// and Dynamic Weight both consume.
    fn classify_response(&self, status: u16, body: &[u8]) -> ErrorKind {
        default_classify(status, body)
    }
}

/// Shared status-code classification, reusable by every native handler;
/// channel-specific overrides only need to special-case distinctive error
/// payload shapes (e.g. OpenAI's `{"error":{"code":"invalid_api_key"}}`).
pub fn default_classify(status: u16, _body: &[u8]) -> ErrorKind {
    match status {
        200..=299 => ErrorKind::Internal, // callers special-case success before reaching here
        401 | 403 => ErrorKind::UpstreamFatalForKey,
        404 => ErrorKind::UpstreamFatalForGroup,
        408 | 429 => ErrorKind::UpstreamTransient,
        500..=599 => ErrorKind::UpstreamTransient,
        _ => ErrorKind::UpstreamFatalForGroup,
    }
}
