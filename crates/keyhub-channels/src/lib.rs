//! Channel handlers (spec §4.4): one [`handler::ChannelHandler`] impl per
//! upstream wire shape, a static compatibility table, and the
//! [`registry`] glue that bridges a non-native relay/channel pairing through
//! `keyhub-transform` when a group's `cc_support` flag allows it.

pub mod azure;
pub mod claude;
pub mod codex;
pub mod compat;
pub mod gemini;
pub mod handler;
pub mod openai;
pub mod registry;

pub use compat::{compatible_channels, is_compatible, requires_cc_support};
pub use handler::{ChannelError, ChannelHandler, RewrittenRequest};
pub use registry::{convert_response, native_handler, needs_conversion, rewrite_for_relay};
