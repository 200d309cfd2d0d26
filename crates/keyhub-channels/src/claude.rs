use bytes::Bytes;
use keyhub_common::{ChannelType, ErrorKind, RelayFormat};
use serde_json::Value;

use crate::handler::{ChannelError, ChannelHandler, RewrittenRequest};

pub struct ClaudeHandler;

#[async_trait::async_trait]
impl ChannelHandler for ClaudeHandler {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Anthropic
    }

    fn relay_format(&self) -> RelayFormat {
        RelayFormat::Claude
    }

    fn rewrite_request(
        &self,
        mut body: Value,
        rewritten_model: &str,
        upstream_base: &str,
        api_key: &str,
    ) -> Result<RewrittenRequest, ChannelError> {
        body["model"] = Value::String(rewritten_model.to_string());
        let payload = serde_json::to_vec(&body).map_err(|e| ChannelError::Malformed(e.to_string()))?;
        Ok(RewrittenRequest {
            path: format!("{upstream_base}/v1/messages"),
            headers: vec![
                ("x-api-key".to_string(), api_key.to_string()),
                ("anthropic-version".to_string(), "2023-06-01".to_string()),
            ],
            body: Bytes::from(payload),
        })
    }

    /// Anthropic's error envelope carries its own `type` taxonomy
    /// (`authentication_error`, `not_found_error`, `overloaded_error`, ...);
    /// the status-code classification already lines up with spec §7, so
    /// there's nothing this handler needs beyond the default.
    fn classify_response(&self, status: u16, body: &[u8]) -> ErrorKind {
        crate::handler::default_classify(status, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_targets_messages_endpoint_with_key_header() {
        let handler = ClaudeHandler;
        let out = handler
            .rewrite_request(serde_json::json!({"model": "old", "messages": []}), "claude-3-opus", "https://api.anthropic.com", "sk-ant-1")
            .unwrap();
        assert_eq!(out.path, "https://api.anthropic.com/v1/messages");
        assert!(out.headers.contains(&("x-api-key".to_string(), "sk-ant-1".to_string())));
        let body: Value = serde_json::from_slice(&out.body).unwrap();
        assert_eq!(body["model"], "claude-3-opus");
    }
}
