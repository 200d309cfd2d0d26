//! Maps the Hub path's wire surface (spec §6) onto a [`RelayFormat`]. Kept
//! separate from `proxy.rs` so the one place that knows the literal path
//! strings is easy to audit against the spec's wire-surface list.

use keyhub_common::RelayFormat;

/// `path` is the request path with the `/hub/v1/` prefix already stripped.
/// Returns `None` for `models` (listing, served by its own handler) or any
/// path this surface doesn't recognize.
pub fn relay_format_for_hub_path(path: &str) -> Option<RelayFormat> {
    match path {
        "chat/completions" | "embeddings" | "audio/transcriptions" | "audio/speech" | "images/generations"
        | "images/edits" | "moderations" => Some(RelayFormat::OpenaiChat),
        "messages" => Some(RelayFormat::Claude),
        "models" => None,
        _ if path.starts_with("v1beta/models/") => Some(RelayFormat::Gemini),
        _ => None,
    }
}

/// Direct per-group passthrough (spec §6 `GET /proxy/{group_name}/v1/*`)
/// recognizes one extra native shape the Hub surface doesn't expose: a
/// group whose `channel_type` is `codex` is reached only here, at its own
/// native `/v1/responses` endpoint (mirrors the teacher's
/// `gproxy-router::proxy_router`'s `/v1/responses` route).
pub fn relay_format_for_direct_path(path: &str) -> Option<RelayFormat> {
    match path {
        "responses" => Some(RelayFormat::Codex),
        _ => relay_format_for_hub_path(path),
    }
}

/// The path fragment a [`keyhub_channels::ChannelHandler`] expects to see,
/// derived from the raw suffix captured after the route's fixed prefix.
/// Only Gemini's handler reads this; everything else ignores it.
pub fn inbound_path_for(relay_format: RelayFormat, raw_suffix: &str) -> String {
    match relay_format {
        RelayFormat::Gemini => raw_suffix.trim_start_matches('/').to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_openai_family_paths() {
        assert_eq!(relay_format_for_hub_path("chat/completions"), Some(RelayFormat::OpenaiChat));
        assert_eq!(relay_format_for_hub_path("images/edits"), Some(RelayFormat::OpenaiChat));
    }

    #[test]
    fn recognizes_claude_and_gemini() {
        assert_eq!(relay_format_for_hub_path("messages"), Some(RelayFormat::Claude));
        assert_eq!(relay_format_for_hub_path("v1beta/models/gemini-pro:generateContent"), Some(RelayFormat::Gemini));
    }

    #[test]
    fn models_listing_and_unknown_paths_have_no_relay_format() {
        assert_eq!(relay_format_for_hub_path("models"), None);
        assert_eq!(relay_format_for_hub_path("unknown"), None);
    }

    #[test]
    fn direct_path_recognizes_codex_responses() {
        assert_eq!(relay_format_for_direct_path("responses"), Some(RelayFormat::Codex));
        assert_eq!(relay_format_for_direct_path("chat/completions"), Some(RelayFormat::OpenaiChat));
    }
}
