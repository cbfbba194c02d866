//! OpenAI-compatible chat completions client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CompletionRequest, LlmClient};
use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::metrics;

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: Client,
    api_key: String,
    pub base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiClient {
    /// Client for the hosted OpenAI API. The key must be non-blank.
    pub fn new<S: Into<String>>(api_key: S, model: &str) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::ConfigError("OPENAI_API_KEY is empty".to_string()));
        }
        Self::build(api_key, OPENAI_API_URL.to_string(), model, Duration::from_secs(120))
    }

    /// Client from configuration. Self-hosted endpoints may run without a key.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if config.api_key.trim().is_empty() && base_url == OPENAI_API_URL {
            return Err(Error::ConfigError("OPENAI_API_KEY is empty".to_string()));
        }

        let mut client = Self::build(
            config.api_key.clone(),
            base_url,
            &config.model,
            Duration::from_secs(config.timeout_secs),
        )?;
        client.temperature = config.temperature;
        client.max_tokens = config.max_tokens;
        Ok(client)
    }

    fn build(api_key: String, base_url: String, model: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("slack_knowledge/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ConfigError(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model: model.to_string(),
            temperature: 0.2,
            max_tokens: 4096,
        })
    }

    async fn chat_completion(&self, request: &CompletionRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(request.system.clone()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(request.user.clone()),
                },
            ],
            temperature: request.temperature.unwrap_or(self.temperature),
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            response_format: request.json_response.then(|| ResponseFormat {
                kind: "json_object",
            }),
        };

        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::ConnectionError(format!("LLM request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::ConnectionError(format!("Failed to read LLM response: {}", e)))?;

        if !status.is_success() {
            let message = format!("{} {}: {}", self.model, status, text);
            return Err(if status.as_u16() == 429 || status.as_u16() == 408 || status.is_server_error() {
                Error::LlmError(message)
            } else {
                Error::LlmRejected(message)
            });
        }

        let chat: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| Error::LlmError(format!("Invalid response: {}", e)))?;

        if let Some(usage) = &chat.usage {
            debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "LLM usage"
            );
        }

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| Error::LlmError("Empty response from LLM".to_string()))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let result = self.chat_completion(request).await;
        metrics::record_llm_call(&self.model, result.is_ok());
        result
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
