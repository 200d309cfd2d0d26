//! Azure OpenAI speaks the same `openai_chat` wire shape as `openai`, but
//! authenticates with an `api-key` header instead of `Authorization: Bearer`
//! and addresses a deployment rather than a model in its path. `upstream_base`
//! for an Azure group is expected to already include the resource + deployment
//! segments (`https://{resource}.openai.azure.com/openai/deployments/{deployment}`),
//! matching how the teacher stores a fully-qualified endpoint per provider
//! rather than templating it from parts.

use bytes::Bytes;
use keyhub_common::{ChannelType, RelayFormat};
use serde_json::Value;

use crate::handler::{ChannelError, ChannelHandler, RewrittenRequest};

const DEFAULT_API_VERSION: &str = "2024-06-01";

pub struct AzureHandler;

#[async_trait::async_trait]
impl ChannelHandler for AzureHandler {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Azure
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
        // Azure ignores `model` in the body (the deployment in the URL picks
        // it), but the field is left set so logging/classification downstream
        // still has something human-readable to show.
        body["model"] = Value::String(rewritten_model.to_string());
        let payload = serde_json::to_vec(&body).map_err(|e| ChannelError::Malformed(e.to_string()))?;
        Ok(RewrittenRequest {
            path: format!("{upstream_base}/chat/completions?api-version={DEFAULT_API_VERSION}"),
            headers: vec![("api-key".to_string(), api_key.to_string())],
            body: Bytes::from(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_uses_api_key_header_and_api_version_query() {
        let handler = AzureHandler;
        let out = handler
            .rewrite_request(
                serde_json::json!({"model": "old"}),
                "gpt-4o",
                "https://my-resource.openai.azure.com/openai/deployments/gpt-4o-deployment",
                "az-key",
            )
            .unwrap();
        assert!(out.path.ends_with(&format!("/chat/completions?api-version={DEFAULT_API_VERSION}")));
        assert!(out.headers.contains(&("api-key".to_string(), "az-key".to_string())));
    }
}
