use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{decode, non_empty, read_body, transport, Provider};
use crate::errors::{ConfigError, GenerationError};

const NAME: &str = "openai";

/// OpenAI chat completions. The prompt is sent as a single user message.
pub struct OpenAIProvider {
    model: String,
    api_key: String,
    api_base: String,
    client: Client,
}

impl OpenAIProvider {
    pub fn new(model: String, api_key: String, api_base: String, timeout: Duration) -> Result<Self, ConfigError> {
        Ok(Self { model, api_key, api_base, client: super::http_client(timeout)? })
    }
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let url = format!("{}/v1/chat/completions", self.api_base.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "temperature": 0.7
        });
        tracing::debug!(provider = NAME, %url, prompt_chars = prompt.chars().count(), "POST");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport(NAME, e))?;
        let text = read_body(NAME, resp).await?;

        let parsed: ChatResponse = decode(NAME, &text)?;
        let content = parsed.choices.into_iter().next().and_then(|c| c.message.content);
        non_empty(NAME, content)
    }
}
