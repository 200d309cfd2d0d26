use bytes::Bytes;
use keyhub_common::{ChannelType, RelayFormat};
use serde_json::Value;

use crate::handler::{ChannelError, ChannelHandler, RewrittenRequest};

pub struct OpenAiChatHandler;

#[async_trait::async_trait]
impl ChannelHandler for OpenAiChatHandler {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Openai
    }

    fn relay_format(&self) -> RelayFormat {
        RelayFormat::OpenaiChat
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
            path: format!("{upstream_base}/v1/chat/completions"),
            headers: vec![("Authorization".to_string(), format!("Bearer {api_key}"))],
            body: Bytes::from(payload),
        })
    }
}
