//! Codex is a thin OpenAI-chat variant: same wire shape, but every request
//! gets a mandatory system instructions preamble injected before it leaves
//! this proxy (spec §4.4 "Codex ... a thin OpenAI-chat variant with
//! Codex-specific header/instruction rewriting"), grounded in the teacher's
//! `gproxy-provider-impl/src/provider/codex/instructions.rs`
//! (`instructions_for_model`). This proxy has no bundled prompt library, so
//! it ships one default preamble instead of the teacher's per-model set.

use bytes::Bytes;
use keyhub_common::{ChannelType, RelayFormat};
use serde_json::Value;

use crate::handler::{ChannelError, ChannelHandler, RewrittenRequest};

pub struct CodexHandler;

impl CodexHandler {
    fn ensure_instructions(body: &mut Value) {
        let obj = match body.as_object_mut() {
            Some(obj) => obj,
            None => return,
        };
        if obj.contains_key("instructions") {
            return;
        }
        obj.insert(
            "instructions".to_string(),
            Value::String(keyhub_protocol::codex::DEFAULT_INSTRUCTIONS.to_string()),
        );
    }
}

#[async_trait::async_trait]
impl ChannelHandler for CodexHandler {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Codex
    }

    fn relay_format(&self) -> RelayFormat {
        RelayFormat::Codex
    }

    fn rewrite_request(
        &self,
        mut body: Value,
        rewritten_model: &str,
        upstream_base: &str,
        api_key: &str,
    ) -> Result<RewrittenRequest, ChannelError> {
        body["model"] = Value::String(rewritten_model.to_string());
        Self::ensure_instructions(&mut body);
        let payload = serde_json::to_vec(&body).map_err(|e| ChannelError::Malformed(e.to_string()))?;
        Ok(RewrittenRequest {
            path: format!("{upstream_base}/v1/responses"),
            headers: vec![("Authorization".to_string(), format!("Bearer {api_key}"))],
            body: Bytes::from(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_instructions_get_the_default_preamble() {
        let handler = CodexHandler;
        let out = handler
            .rewrite_request(serde_json::json!({"model": "old"}), "codex-mini-latest", "https://api.openai.com", "sk-1")
            .unwrap();
        let body: Value = serde_json::from_slice(&out.body).unwrap();
        assert_eq!(body["instructions"], keyhub_protocol::codex::DEFAULT_INSTRUCTIONS);
    }

    #[test]
    fn caller_supplied_instructions_are_not_overwritten() {
        let handler = CodexHandler;
        let out = handler
            .rewrite_request(serde_json::json!({"model": "old", "instructions": "custom"}), "codex-mini-latest", "https://api.openai.com", "sk-1")
            .unwrap();
        let body: Value = serde_json::from_slice(&out.body).unwrap();
        assert_eq!(body["instructions"], "custom");
    }
}
