//! OpenAI chat-completions adapter

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use super::{LLMClient, LLMError, Result};
use crate::config::LlmConfig;
use crate::errors::AssistantError;
use crate::memory::Turn;

pub struct OpenAIClient {
    model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    /// Create a client from configuration
    ///
    /// The API key is read from the environment variable named in
    /// `config.api_key_env`; a missing key is a startup-fatal
    /// configuration error.
    pub fn new(config: &LlmConfig) -> std::result::Result<Self, AssistantError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            AssistantError::Config(format!(
                "environment variable {} is not set",
                config.api_key_env
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AssistantError::Config(format!("HTTP client setup failed: {e}")))?;

        Ok(Self {
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    /// Test constructor with an explicit key, bypassing the environment
    pub fn with_key(config: &LlmConfig, api_key: impl Into<String>) -> Self {
        Self {
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, turns: &[Turn]) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let messages: Vec<serde_json::Value> = turns
            .iter()
            .map(|turn| {
                json!({
                    "role": turn.role.to_string(),
                    "content": turn.content,
                })
            })
            .collect();

        let payload = json!({
            "model": self.model,
            "messages": messages,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else {
                    LLMError::Network(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => LLMError::AuthenticationFailed(text),
                429 => LLMError::RateLimited,
                500..=599 => LLMError::Upstream(format!("{status}: {text}")),
                _ => LLMError::Upstream(text),
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::Parse(e.to_string()))?;

        let content = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or_else(|| LLMError::Parse("no message content in response".to_string()))?;

        Ok(content.to_string())
    }
}
