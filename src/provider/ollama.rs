use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{decode, non_empty, read_body, transport, Provider};
use crate::errors::{ConfigError, GenerationError};

const NAME: &str = "ollama";

/// Local Ollama server. Needs no credential.
pub struct Ollama {
    model: String,
    url: String,
    client: Client,
}

impl Ollama {
    pub fn new(model: String, url: String, timeout: Duration) -> Result<Self, ConfigError> {
        Ok(Self { model, url, client: super::http_client(timeout)? })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<MsgOut>,
}

#[derive(Deserialize)]
struct MsgOut {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl Provider for Ollama {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let url = format!("{}/api/chat", self.url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.model,
            messages: vec![Msg { role: "user", content: prompt }],
            stream: false,
            options: OllamaOptions { temperature: 0.7 },
        };
        tracing::debug!(provider = NAME, %url, prompt_chars = prompt.chars().count(), "POST");

        let resp = self.client.post(&url).json(&body).send().await.map_err(|e| transport(NAME, e))?;
        let text = read_body(NAME, resp).await?;

        let parsed: ChatResponse = decode(NAME, &text)?;
        non_empty(NAME, parsed.message.map(|m| m.content))
    }
}
