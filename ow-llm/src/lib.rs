//! Chat-completions client for the open-workflows agent backend.
//!
//! Speaks the OpenAI-compatible `/chat/completions` wire format, which every
//! configured provider (OpenAI, MiniMax, OpenRouter, ...) exposes.

mod client;
mod error;
mod model;
mod types;
mod wire;

pub use client::{LlmClient, ProviderEndpoint};
pub use error::{LlmError, Result};
pub use model::ModelRef;
pub use types::{ChatMessage, ChatResponse, Role, ToolCall, ToolDefinition, Usage};
