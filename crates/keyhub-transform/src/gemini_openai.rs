use keyhub_protocol::gemini;
use keyhub_protocol::openai;
use serde_json::{Map, Value};

use crate::claude_openai::content_to_text;
use crate::TransformError;

fn openai_role(gemini_role: &str) -> String {
    match gemini_role {
        "model" => "assistant".to_string(),
        other => other.to_string(),
    }
}

fn gemini_role(openai_role: &str) -> String {
    match openai_role {
        "assistant" => "model".to_string(),
        other => other.to_string(),
    }
}

pub fn request_gemini_to_openai(
    req: gemini::GenerateContentRequest,
    model: String,
) -> Result<openai::ChatCompletionRequest, TransformError> {
    let mut messages = Vec::with_capacity(req.contents.len() + 1);
    if let Some(system) = req
        .extra
        .get("systemInstruction")
        .and_then(|v| v.get("parts"))
    {
        messages.push(openai::ChatMessage {
            role: "system".to_string(),
            content: Some(Value::String(content_to_text(system))),
            name: None,
            extra: Map::new(),
        });
    }
    for c in req.contents {
        let role = openai_role(c.role.as_deref().unwrap_or("user"));
        let text = c
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        messages.push(openai::ChatMessage {
            role,
            content: Some(Value::String(text)),
            name: None,
            extra: Map::new(),
        });
    }
    let max_tokens = req
        .generation_config
        .as_ref()
        .and_then(|c| c.get("maxOutputTokens"))
        .and_then(Value::as_u64)
        .map(|n| n as u32);
    Ok(openai::ChatCompletionRequest {
        model,
        messages,
        stream: None,
        temperature: None,
        max_tokens,
        extra: Map::new(),
    })
}

pub fn request_openai_to_gemini(
    req: openai::ChatCompletionRequest,
) -> Result<gemini::GenerateContentRequest, TransformError> {
    let mut contents = Vec::new();
    let mut extra = Map::new();
    for m in req.messages {
        let text = m.content.as_ref().map(content_to_text).unwrap_or_default();
        if m.role == "system" {
            extra.insert(
                "systemInstruction".to_string(),
                Value::Object(Map::from_iter([(
                    "parts".to_string(),
                    Value::Array(vec![serde_json::json!({"text": text})]),
                )])),
            );
            continue;
        }
        contents.push(gemini::Content {
            role: Some(gemini_role(&m.role)),
            parts: vec![gemini::Part { text: Some(text), extra: Map::new() }],
        });
    }
    let generation_config = req.max_tokens.map(|n| {
        Value::Object(Map::from_iter([("maxOutputTokens".to_string(), Value::from(n))]))
    });
    Ok(gemini::GenerateContentRequest { contents, generation_config, extra })
}

pub fn response_gemini_to_openai(resp: gemini::GenerateContentResponse, model: String) -> openai::ChatCompletionResponse {
    let usage = resp.usage_metadata.map(|u| openai::Usage {
        prompt_tokens: u.prompt_token_count,
        completion_tokens: u.candidates_token_count,
        total_tokens: u.prompt_token_count + u.candidates_token_count,
    });
    let text = resp
        .candidates
        .first()
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .map(content_to_text)
        .unwrap_or_default();
    let mut extra = Map::new();
    extra.insert(
        "choices".to_string(),
        Value::Array(vec![serde_json::json!({
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop",
        })]),
    );
    openai::ChatCompletionResponse { id: String::new(), model, usage, extra }
}

pub fn response_openai_to_gemini(resp: openai::ChatCompletionResponse) -> gemini::GenerateContentResponse {
    let text = resp
        .extra
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .map(content_to_text)
        .unwrap_or_default();
    let usage_metadata = resp.usage.map(|u| gemini::UsageMetadata {
        prompt_token_count: u.prompt_tokens,
        candidates_token_count: u.completion_tokens,
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
    fn openai_system_message_becomes_system_instruction() {
        let req = openai::ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![
                openai::ChatMessage { role: "system".to_string(), content: Some(json!("be terse")), name: None, extra: Map::new() },
                openai::ChatMessage { role: "user".to_string(), content: Some(json!("hi")), name: None, extra: Map::new() },
            ],
            stream: None,
            temperature: None,
            max_tokens: None,
            extra: Map::new(),
        };
        let out = request_openai_to_gemini(req).unwrap();
        assert_eq!(out.contents.len(), 1);
        assert!(out.extra.contains_key("systemInstruction"));
    }

    #[test]
    fn gemini_to_openai_hoists_system_instruction_into_messages() {
        let mut extra = Map::new();
        extra.insert(
            "systemInstruction".to_string(),
            json!({"parts": [{"text": "be terse"}]}),
        );
        let req = gemini::GenerateContentRequest {
            contents: vec![gemini::Content {
                role: Some("user".to_string()),
                parts: vec![gemini::Part { text: Some("hi".to_string()), extra: Map::new() }],
            }],
            generation_config: None,
            extra,
        };
        let out = request_gemini_to_openai(req, "gemini-pro".to_string()).unwrap();
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].role, "system");
    }
}
