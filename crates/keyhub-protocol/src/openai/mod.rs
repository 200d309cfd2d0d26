//! Wire shapes for the OpenAI-native relay format (`openai_chat`).
//!
//! Only the fields the proxy actually inspects (`model`, `stream`) are typed;
//! everything else round-trips through `extra` so unknown/new OpenAI fields
//! are forwarded byte-for-byte instead of being dropped by a partial model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatCompletionRequest {
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub model: String,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One `data:` payload of a `text/event-stream` chat-completions response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub model: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub const DONE_MARKER: &str = "[DONE]";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_round_trip_through_extra() {
        let raw = serde_json::json!({
            "model": "alpha",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
            "response_format": {"type": "json_object"}
        });
        let req: ChatCompletionRequest = serde_json::from_value(raw.clone()).unwrap();
        assert!(req.is_stream());
        assert_eq!(req.extra.get("response_format"), raw.get("response_format"));
        let back = serde_json::to_value(&req).unwrap();
        assert_eq!(back["response_format"], raw["response_format"]);
    }
}
