use serde::{Deserialize, Serialize};

/// The wire protocol family of an upstream (spec Glossary "Channel type").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Openai,
    Anthropic,
    Gemini,
    Codex,
    Azure,
}

impl ChannelType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelType::Openai => "openai",
            ChannelType::Anthropic => "anthropic",
            ChannelType::Gemini => "gemini",
            ChannelType::Codex => "codex",
            ChannelType::Azure => "azure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "openai" => Some(ChannelType::Openai),
            "anthropic" => Some(ChannelType::Anthropic),
            "gemini" => Some(ChannelType::Gemini),
            "codex" => Some(ChannelType::Codex),
            "azure" => Some(ChannelType::Azure),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The wire shape the caller speaks (spec Glossary "Relay format").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayFormat {
    OpenaiChat,
    Claude,
    Gemini,
    Codex,
}

impl RelayFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayFormat::OpenaiChat => "openai_chat",
            RelayFormat::Claude => "claude",
            RelayFormat::Gemini => "gemini",
            RelayFormat::Codex => "codex",
        }
    }

    /// The channel type this relay format is native to.
    pub fn native_channel(self) -> ChannelType {
        match self {
            RelayFormat::OpenaiChat => ChannelType::Openai,
            RelayFormat::Claude => ChannelType::Anthropic,
            RelayFormat::Gemini => ChannelType::Gemini,
            RelayFormat::Codex => ChannelType::Codex,
        }
    }
}

impl std::fmt::Display for RelayFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
