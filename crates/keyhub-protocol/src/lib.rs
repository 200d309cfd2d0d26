pub mod claude;
pub mod codex;
pub mod gemini;
pub mod list_models;
pub mod openai;
pub mod sse;

pub use sse::{SseEvent, SseParser};
