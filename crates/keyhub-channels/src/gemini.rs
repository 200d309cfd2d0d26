use bytes::Bytes;
use keyhub_common::{ChannelType, RelayFormat};
use serde_json::Value;

use crate::handler::{ChannelError, ChannelHandler, RewrittenRequest};

pub struct GeminiHandler;

#[async_trait::async_trait]
impl ChannelHandler for GeminiHandler {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Gemini
    }

    fn relay_format(&self) -> RelayFormat {
        RelayFormat::Gemini
    }

    /// Gemini carries the model in the request path (`models/{model}:action`),
    /// not in the body, so `extract_model` needs the path while `openai`'s
    /// default impl only inspects the body.
    fn extract_model(&self, body: &Value, path: &str) -> Result<String, ChannelError> {
        let _ = body;
        keyhub_protocol::gemini::parse_model_action(path)
            .map(|(model, _action)| model.to_string())
            .ok_or_else(|| ChannelError::Malformed(format!("path {path:?} is not models/{{model}}:{{action}}")))
    }

    fn rewrite_request(
        &self,
        body: Value,
        rewritten_model: &str,
        upstream_base: &str,
        api_key: &str,
    ) -> Result<RewrittenRequest, ChannelError> {
        let payload = serde_json::to_vec(&body).map_err(|e| ChannelError::Malformed(e.to_string()))?;
        Ok(RewrittenRequest {
            path: format!("{upstream_base}/v1beta/models/{rewritten_model}:generateContent?key={api_key}"),
            headers: Vec::new(),
            body: Bytes::from(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_model_reads_path_not_body() {
        let handler = GeminiHandler;
        let model = handler.extract_model(&Value::Null, "models/gemini-1.5-pro:generateContent").unwrap();
        assert_eq!(model, "gemini-1.5-pro");
    }

    #[test]
    fn rewrite_puts_key_in_query_string() {
        let handler = GeminiHandler;
        let out = handler.rewrite_request(serde_json::json!({}), "gemini-1.5-pro", "https://generativelanguage.googleapis.com", "k1").unwrap();
        assert!(out.path.ends_with("models/gemini-1.5-pro:generateContent?key=k1"));
        assert!(out.headers.is_empty());
    }
}
