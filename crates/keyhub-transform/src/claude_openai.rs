use keyhub_protocol::claude;
use keyhub_protocol::openai;
use serde_json::{Map, Value};

use crate::TransformError;

/// Flattens Claude/OpenAI "content" (a string, or an array of `{type, text}`
/// blocks) into plain text. Non-text blocks (images, tool calls) are dropped —
/// acceptable for the `cc_support` fallback path, which exists to let a
/// differently-shaped channel serve a request at all, not to preserve every
/// modality.
pub fn content_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn claude_blocks(text: &str) -> Value {
    Value::Array(vec![serde_json::json!({"type": "text", "text": text})])
}

pub fn request_claude_to_openai(
    req: claude::CreateMessageRequest,
) -> Result<openai::ChatCompletionRequest, TransformError> {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    if let Some(system) = &req.system {
        messages.push(openai::ChatMessage {
            role: "system".to_string(),
            content: Some(Value::String(content_to_text(system))),
            name: None,
            extra: Map::new(),
        });
    }
    for m in req.messages {
        messages.push(openai::ChatMessage {
            role: m.role,
            content: Some(Value::String(content_to_text(&m.content))),
            name: None,
            extra: Map::new(),
        });
    }
    Ok(openai::ChatCompletionRequest {
        model: req.model,
        messages,
        stream: req.stream,
        temperature: None,
        max_tokens: Some(req.max_tokens),
        extra: req.extra,
    })
}

pub fn request_openai_to_claude(
    req: openai::ChatCompletionRequest,
) -> Result<claude::CreateMessageRequest, TransformError> {
    let mut system = None;
    let mut messages = Vec::new();
    for m in req.messages {
        let text = m
            .content
            .as_ref()
            .map(content_to_text)
            .unwrap_or_default();
        if m.role == "system" {
            system = Some(Value::String(text));
            continue;
        }
        messages.push(claude::Message {
            role: m.role,
            content: claude_blocks(&text),
        });
    }
    Ok(claude::CreateMessageRequest {
        model: req.model,
        messages,
        max_tokens: req.max_tokens.unwrap_or(4096),
        system,
        stream: req.stream,
        extra: req.extra,
    })
}

pub fn response_claude_to_openai(resp: claude::CreateMessageResponse) -> openai::ChatCompletionResponse {
    let usage = resp.usage.map(|u| openai::Usage {
        prompt_tokens: u.input_tokens,
        completion_tokens: u.output_tokens,
        total_tokens: u.input_tokens + u.output_tokens,
    });
    openai::ChatCompletionResponse {
        id: resp.id,
        model: resp.model,
        usage,
        extra: resp.extra,
    }
}

pub fn response_openai_to_claude(resp: openai::ChatCompletionResponse) -> claude::CreateMessageResponse {
    let usage = resp.usage.map(|u| claude::Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
    });
    claude::CreateMessageResponse {
        id: resp.id,
        model: resp.model,
        kind: "message".to_string(),
        usage,
        extra: resp.extra,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn claude_to_openai_hoists_system_message() {
        let req = claude::CreateMessageRequest {
            model: "claude-3".to_string(),
            messages: vec![claude::Message {
                role: "user".to_string(),
                content: json!("hello"),
            }],
            max_tokens: 100,
            system: Some(json!("be terse")),
            stream: None,
            extra: Map::new(),
        };
        let out = request_claude_to_openai(req).unwrap();
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].role, "system");
        assert_eq!(out.messages[1].role, "user");
    }

    #[test]
    fn openai_to_claude_extracts_system_out_of_messages() {
        let req = openai::ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![
                openai::ChatMessage {
                    role: "system".to_string(),
                    content: Some(json!("be terse")),
                    name: None,
                    extra: Map::new(),
                },
                openai::ChatMessage {
                    role: "user".to_string(),
                    content: Some(json!("hi")),
                    name: None,
                    extra: Map::new(),
                },
            ],
            stream: None,
            temperature: None,
            max_tokens: None,
            extra: Map::new(),
        };
        let out = request_openai_to_claude(req).unwrap();
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.system, Some(json!("be terse")));
    }
}
