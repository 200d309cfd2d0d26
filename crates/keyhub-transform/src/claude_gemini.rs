use keyhub_protocol::claude;
use keyhub_protocol::gemini;
use serde_json::{Map, Value};

use crate::claude_openai::content_to_text;
use crate::TransformError;

fn gemini_role(claude_role: &str) -> String {
    match claude_role {
        "assistant" => "model".to_string(),
        other => other.to_string(),
    }
}

fn claude_role(gemini_role: &str) -> String {
    match gemini_role {
        "model" => "assistant".to_string(),
        other => other.to_string(),
    }
}

pub fn request_claude_to_gemini(
    req: claude::CreateMessageRequest,
) -> Result<gemini::GenerateContentRequest, TransformError> {
    let mut contents = Vec::with_capacity(req.messages.len());
    for m in req.messages {
        contents.push(gemini::Content {
            role: Some(gemini_role(&m.role)),
            parts: vec![gemini::Part {
                text: Some(content_to_text(&m.content)),
                extra: Map::new(),
            }],
        });
    }
    let mut generation_config = Map::new();
    generation_config.insert("maxOutputTokens".to_string(), Value::from(req.max_tokens));
    let mut extra = req.extra;
    if let Some(system) = req.system {
        extra.insert(
            "systemInstruction".to_string(),
            Value::Object(Map::from_iter([(
                "parts".to_string(),
                Value::Array(vec![serde_json::json!({"text": content_to_text(&system)})]),
            )])),
        );
    }
    Ok(gemini::GenerateContentRequest {
        contents,
        generation_config: Some(Value::Object(generation_config)),
        extra,
    })
}

pub fn request_gemini_to_claude(
    req: gemini::GenerateContentRequest,
    model: String,
) -> Result<claude::CreateMessageRequest, TransformError> {
    let mut messages = Vec::with_capacity(req.contents.len());
    for c in req.contents {
        let role = claude_role(c.role.as_deref().unwrap_or("user"));
        let text = c
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        messages.push(claude::Message {
            role,
            content: Value::String(text),
        });
    }
    let max_tokens = req
        .generation_config
        .as_ref()
        .and_then(|c| c.get("maxOutputTokens"))
        .and_then(Value::as_u64)
        .unwrap_or(4096) as u32;
    let system = req
        .extra
        .get("systemInstruction")
        .and_then(|v| v.get("parts"))
        .map(|parts| Value::String(content_to_text(parts)));
    Ok(claude::CreateMessageRequest {
        model,
        messages,
        max_tokens,
        system,
        stream: None,
        extra: Map::new(),
    })
}

pub fn response_gemini_to_claude(resp: gemini::GenerateContentResponse, model: String) -> claude::CreateMessageResponse {
    let text = resp
        .candidates
        .first()
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .map(content_to_text)
        .unwrap_or_default();
    let usage = resp.usage_metadata.map(|u| claude::Usage {
        input_tokens: u.prompt_token_count,
        output_tokens: u.candidates_token_count,
    });
    let mut extra = Map::new();
    extra.insert(
        "content".to_string(),
        Value::Array(vec![serde_json::json!({"type": "text", "text": text})]),
    );
    claude::CreateMessageResponse {
        id: String::new(),
        model,
        kind: "message".to_string(),
        usage,
        extra,
    }
}

pub fn response_claude_to_gemini(resp: claude::CreateMessageResponse) -> gemini::GenerateContentResponse {
    let text = resp
        .extra
        .get("content")
        .map(content_to_text)
        .unwrap_or_default();
    let usage_metadata = resp.usage.map(|u| gemini::UsageMetadata {
        prompt_token_count: u.input_tokens,
        candidates_token_count: u.output_tokens,
    });
    gemini::GenerateContentResponse {
        candidates: vec![serde_json::json!({
            "content": {"role": "model", "parts": [{"text": text}]},
        })],
        usage_metadata,
        extra: Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assistant_role_maps_to_model() {
        let req = claude::CreateMessageRequest {
            model: "claude-3".to_string(),
            messages: vec![claude::Message {
                role: "assistant".to_string(),
                content: json!("hi"),
            }],
            max_tokens: 256,
            system: None,
            stream: None,
            extra: Map::new(),
        };
        let out = request_claude_to_gemini(req).unwrap();
        assert_eq!(out.contents[0].role.as_deref(), Some("model"));
    }

    #[test]
    fn model_role_maps_back_to_assistant() {
        let req = gemini::GenerateContentRequest {
            contents: vec![gemini::Content {
                role: Some("model".to_string()),
                parts: vec![gemini::Part { text: Some("hi".to_string()), extra: Map::new() }],
            }],
            generation_config: None,
            extra: Map::new(),
        };
        let out = request_gemini_to_claude(req, "claude-3".to_string()).unwrap();
        assert_eq!(out.messages[0].role, "assistant");
    }
}
