//! Wire shapes for the Gemini-native relay format (`gemini`).
//!
//! The model name is not a body field for Gemini; it is a path segment
//! (`models/{model}:generateContent`). Extraction lives in `keyhub-channels`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "generationConfig")]
    pub generation_config: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    pub prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    pub candidates_token_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Value>,
    #[serde(rename = "usageMetadata", default)]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parses `models/{model}:{action}` out of a Gemini request path.
pub fn parse_model_action(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix("models/")?;
    let (model, action) = rest.split_once(':')?;
    if model.is_empty() || action.is_empty() {
        return None;
    }
    Some((model, action))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_model_and_action() {
        assert_eq!(
            parse_model_action("models/gemini-pro:generateContent"),
            Some(("gemini-pro", "generateContent"))
        );
        assert_eq!(parse_model_action("models/gemini-pro:streamGenerateContent"), Some(("gemini-pro", "streamGenerateContent")));
        assert_eq!(parse_model_action("not-a-model-path"), None);
    }
}
