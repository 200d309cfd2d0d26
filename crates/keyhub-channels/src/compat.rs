//! Static channel-compatibility table (spec §4.4). Only `claude` actually has
//! a documented non-native path (`cc_support`); the other relay formats stay
//! native-only until a handler exists for the cross-channel conversion.

use keyhub_common::channel::{ChannelType, RelayFormat};

/// Ordered: native channel first, then the `cc_support`-gated fallbacks.
pub fn compatible_channels(relay: RelayFormat) -> &'static [ChannelType] {
    match relay {
        RelayFormat::Claude => &[
            ChannelType::Anthropic,
            ChannelType::Openai,
            ChannelType::Azure,
            ChannelType::Gemini,
            ChannelType::Codex,
        ],
        RelayFormat::OpenaiChat => &[ChannelType::Openai, ChannelType::Azure],
        RelayFormat::Gemini => &[ChannelType::Gemini],
        RelayFormat::Codex => &[ChannelType::Codex],
    }
}

/// Whether `channel` can serve `relay` at all — native or via `cc_support`.
pub fn is_compatible(relay: RelayFormat, channel: ChannelType) -> bool {
    compatible_channels(relay).contains(&channel)
}

/// A non-native pairing requires the group's `cc_support` config flag.
pub fn requires_cc_support(relay: RelayFormat, channel: ChannelType) -> bool {
    channel != relay.native_channel() && is_compatible(relay, channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_channel_is_always_first() {
        for relay in [RelayFormat::OpenaiChat, RelayFormat::Claude, RelayFormat::Gemini, RelayFormat::Codex] {
            assert_eq!(compatible_channels(relay)[0], relay.native_channel());
        }
    }

    #[test]
    fn claude_is_compatible_with_openai_via_cc_support() {
        assert!(is_compatible(RelayFormat::Claude, ChannelType::Openai));
        assert!(requires_cc_support(RelayFormat::Claude, ChannelType::Openai));
        assert!(!requires_cc_support(RelayFormat::Claude, ChannelType::Anthropic));
    }

    #[test]
    fn gemini_has_no_compatible_fallback() {
        assert_eq!(compatible_channels(RelayFormat::Gemini), &[ChannelType::Gemini]);
    }
}
