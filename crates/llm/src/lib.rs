pub mod anthropic;
pub mod client;
pub mod config;
mod http;
pub mod openai;
pub mod retry;

pub use anthropic::AnthropicClient;
pub use client::{ChatMessage, LlmClient, LlmRequest, LlmResponse, Role, TokenUsage};
pub use config::{LlmConfig, SemaphoredClient, build_llm_client, build_llm_client_with};
pub use openai::OpenAiClient;
pub use retry::{RetryConfig, RetryingClient};
