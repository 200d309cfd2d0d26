//! Resolves a [`ChannelType`] to its native [`ChannelHandler`], and bridges
//! the `cc_support` non-native path (spec §4.4 "a static `CHANNEL_COMPAT`
//! table") through `keyhub-transform`'s request/response converters so the
//! Pipeline only ever has to call one function regardless of whether the
//! selected group speaks the caller's relay format natively.

use bytes::Bytes;
use keyhub_common::{ChannelType, RelayFormat};
use keyhub_protocol::{claude, gemini, openai};
use keyhub_transform::{claude_gemini, claude_openai, gemini_openai, TransformError};
use serde_json::Value;

use crate::azure::AzureHandler;
use crate::claude::ClaudeHandler;
use crate::codex::CodexHandler;
use crate::compat::is_compatible;
use crate::gemini::GeminiHandler;
use crate::handler::{ChannelError, ChannelHandler, RewrittenRequest};
use crate::openai::OpenAiChatHandler;

static OPENAI: OpenAiChatHandler = OpenAiChatHandler;
static CLAUDE: ClaudeHandler = ClaudeHandler;
static GEMINI: GeminiHandler = GeminiHandler;
static CODEX: CodexHandler = CodexHandler;
static AZURE: AzureHandler = AzureHandler;

/// Every channel type's native handler, keyed by `channel_type()`. One
/// handler per channel regardless of how many relay formats it ends up
/// serving through `cc_support` conversion.
pub fn native_handler(channel: ChannelType) -> &'static dyn ChannelHandler {
    match channel {
        ChannelType::Openai => &OPENAI,
        ChannelType::Anthropic => &CLAUDE,
        ChannelType::Gemini => &GEMINI,
        ChannelType::Codex => &CODEX,
        ChannelType::Azure => &AZURE,
    }
}

impl From<TransformError> for ChannelError {
    fn from(value: TransformError) -> Self {
        ChannelError::Malformed(value.to_string())
    }
}

/// Whether `channel` serves `relay` by speaking its wire shape unmodified —
/// true for the native pairing, and also true for a same-shape pairing like
/// Azure serving `openai_chat` (only auth/path differ, not the JSON body).
fn same_wire_shape(relay: RelayFormat, channel: ChannelType) -> bool {
    channel == relay.native_channel() || (relay == RelayFormat::OpenaiChat && channel == ChannelType::Azure)
}

/// Whether serving `relay` on `channel` needs a `keyhub-transform` response
/// conversion — i.e. the upstream body isn't already in `relay`'s wire shape.
/// The Pipeline's chunk-by-chunk streaming forward (spec §4.8 "Streaming")
/// only applies when this is `false`; a cross-format conversion needs the
/// complete body in hand to re-shape it.
pub fn needs_conversion(relay: RelayFormat, channel: ChannelType) -> bool {
    !same_wire_shape(relay, channel)
}

/// Rewrites an inbound request body for `channel`, converting it out of
/// `relay`'s wire shape first when the pairing is non-native (spec §4.4/§4.6
/// `cc_support`). Callers are expected to have already checked
/// [`crate::compat::is_compatible`] and, for non-native pairings,
/// `group.config.cc_support`.
pub fn rewrite_for_relay(
    relay: RelayFormat,
    channel: ChannelType,
    body: Value,
    rewritten_model: &str,
    upstream_base: &str,
    api_key: &str,
) -> Result<RewrittenRequest, ChannelError> {
    if !is_compatible(relay, channel) {
        return Err(ChannelError::Unsupported("relay format not compatible with this channel"));
    }
    let handler = native_handler(channel);
    let native_body = if same_wire_shape(relay, channel) {
        body
    } else {
        convert_request(relay, channel, body, rewritten_model)?
    };
    handler.rewrite_request(native_body, rewritten_model, upstream_base, api_key)
}

/// Converts a request body out of `relay`'s native shape into `channel`'s,
/// for every pairing `keyhub-transform` supports. Codex and Azure both speak
/// the `openai_chat` JSON body, so a Claude-relay request bound for either
/// converts identically to the Claude->OpenAI path; `CodexHandler` applies
/// its own instruction-injection afterward.
fn convert_request(relay: RelayFormat, channel: ChannelType, body: Value, model: &str) -> Result<Value, ChannelError> {
    match relay {
        RelayFormat::Claude => {
            let mut req: claude::CreateMessageRequest = serde_json::from_value(body).map_err(|e| ChannelError::Malformed(e.to_string()))?;
            req.model = model.to_string();
            match channel {
                ChannelType::Openai | ChannelType::Azure | ChannelType::Codex => {
                    let out = claude_openai::request_claude_to_openai(req)?;
                    serde_json::to_value(out).map_err(|e| ChannelError::Malformed(e.to_string()))
                }
                ChannelType::Gemini => {
                    let out = claude_gemini::request_claude_to_gemini(req)?;
                    serde_json::to_value(out).map_err(|e| ChannelError::Malformed(e.to_string()))
                }
                ChannelType::Anthropic => unreachable!("native pairing handled by same_wire_shape"),
            }
        }
        RelayFormat::Gemini => {
            let req: gemini::GenerateContentRequest = serde_json::from_value(body).map_err(|e| ChannelError::Malformed(e.to_string()))?;
            match channel {
                ChannelType::Openai | ChannelType::Azure | ChannelType::Codex => {
                    let out = gemini_openai::request_gemini_to_openai(req, model.to_string())?;
                    serde_json::to_value(out).map_err(|e| ChannelError::Malformed(e.to_string()))
                }
                ChannelType::Anthropic => Err(ChannelError::Unsupported("gemini relay has no claude-channel conversion path")),
                ChannelType::Gemini => unreachable!("native pairing handled by same_wire_shape"),
            }
        }
        RelayFormat::OpenaiChat | RelayFormat::Codex => {
            Err(ChannelError::Unsupported("openai_chat/codex relay only serves its native or same-shape channels"))
        }
    }
}

/// Converts a completed upstream response's body back into `relay`'s native
/// shape. Errors (non-2xx) are passed through unconverted — the Pipeline
/// surfaces the upstream's own error envelope once the retry budget is
/// exhausted (spec §7), not a best-effort translation of it.
pub fn convert_response(
    relay: RelayFormat,
    channel: ChannelType,
    status: u16,
    body: Bytes,
    model: &str,
) -> Result<Bytes, ChannelError> {
    if !(200..=299).contains(&status) || same_wire_shape(relay, channel) {
        return Ok(body);
    }
    let converted = match relay {
        RelayFormat::Claude => match channel {
            ChannelType::Openai | ChannelType::Azure | ChannelType::Codex => {
                let resp: openai::ChatCompletionResponse = serde_json::from_slice(&body).map_err(|e| ChannelError::Malformed(e.to_string()))?;
                serde_json::to_vec(&claude_openai::response_openai_to_claude(resp))
            }
            ChannelType::Gemini => {
                let resp: gemini::GenerateContentResponse = serde_json::from_slice(&body).map_err(|e| ChannelError::Malformed(e.to_string()))?;
                serde_json::to_vec(&claude_gemini::response_gemini_to_claude(resp, model.to_string()))
            }
            ChannelType::Anthropic => return Ok(body),
        },
        RelayFormat::Gemini => match channel {
            ChannelType::Openai | ChannelType::Azure | ChannelType::Codex => {
                let resp: openai::ChatCompletionResponse = serde_json::from_slice(&body).map_err(|e| ChannelError::Malformed(e.to_string()))?;
                serde_json::to_vec(&gemini_openai::response_openai_to_gemini(resp))
            }
            _ => return Ok(body),
        },
        RelayFormat::OpenaiChat | RelayFormat::Codex => return Ok(body),
    };
    converted.map(Bytes::from).map_err(|e| ChannelError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_relay_on_openai_channel_converts_request_and_response() {
        let body = serde_json::json!({
            "model": "whatever",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 16,
        });
        let out = rewrite_for_relay(RelayFormat::Claude, ChannelType::Openai, body, "gpt-4o", "https://api.openai.com", "sk-1").unwrap();
        assert!(out.path.ends_with("/v1/chat/completions"));
        let sent: Value = serde_json::from_slice(&out.body).unwrap();
        assert_eq!(sent["messages"][0]["role"], "user");

        let upstream_resp = serde_json::to_vec(&openai::ChatCompletionResponse {
            id: "x".to_string(),
            model: "gpt-4o".to_string(),
            usage: None,
            extra: Default::default(),
        })
        .unwrap();
        let converted = convert_response(RelayFormat::Claude, ChannelType::Openai, 200, Bytes::from(upstream_resp), "gpt-4o").unwrap();
        let claude_resp: claude::CreateMessageResponse = serde_json::from_slice(&converted).unwrap();
        assert_eq!(claude_resp.kind, "message");
    }

    #[test]
    fn azure_serves_openai_chat_without_conversion() {
        let body = serde_json::json!({"model": "old", "messages": []});
        let out = rewrite_for_relay(RelayFormat::OpenaiChat, ChannelType::Azure, body, "gpt-4o", "https://r.openai.azure.com/openai/deployments/d", "az-1").unwrap();
        assert!(out.headers.contains(&("api-key".to_string(), "az-1".to_string())));
    }

    #[test]
    fn incompatible_pairing_is_rejected_before_conversion() {
        let err = rewrite_for_relay(RelayFormat::Gemini, ChannelType::Openai, Value::Null, "m", "https://x", "k");
        assert!(err.is_err());
    }
}
