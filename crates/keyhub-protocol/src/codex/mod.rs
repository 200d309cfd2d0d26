//! Wire shapes for the `codex` channel type.
//!
//! Codex upstreams speak the OpenAI chat-completions shape with a mandatory
//! system instructions preamble injected by the channel handler; the request
//! body itself is otherwise identical to [`crate::openai::ChatCompletionRequest`].

pub use crate::openai::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};

/// Minimal default system preamble used when the group config doesn't supply one.
/// The teacher ships a library of model-specific prompt assets for this; this
/// proxy only needs a placeholder the handler can prepend, since prompt content
/// authoring is outside the core's scope.
pub const DEFAULT_INSTRUCTIONS: &str =
    "You are Codex, operating as a coding agent through an automated relay.";
