//! Language model access.
//!
//! Callers depend on [`LlmClient`]; [`OpenAiClient`] speaks the
//! OpenAI-compatible chat completions API (OpenAI, Ollama, vLLM, ...).

use async_trait::async_trait;

use crate::error::Result;

pub mod openai;
pub mod retry;

pub use openai::OpenAiClient;
pub use retry::{retry_with_backoff, RetryPolicy};

/// One system + user exchange.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    /// Ask the provider for a JSON object response
    pub json_response: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn json(mut self) -> Self {
        self.json_response = true;
        self
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Text content of the first choice.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    fn model(&self) -> &str;
}
