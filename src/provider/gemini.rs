use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{decode, non_empty, read_body, transport, Provider};
use crate::errors::{ConfigError, GenerationError};

const NAME: &str = "gemini";

pub struct Gemini {
    model: String,
    api_key: String,
    api_base: String,
    client: Client,
}

impl Gemini {
    pub fn new(model: String, api_key: String, api_base: String, timeout: Duration) -> Result<Self, ConfigError> {
        Ok(Self { model, api_key, api_base, client: super::http_client(timeout)? })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<PartIn<'a>>,
}

#[derive(Serialize)]
struct PartIn<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ContentOut>,
}

#[derive(Deserialize)]
struct ContentOut {
    #[serde(default)]
    parts: Vec<PartOut>,
}

#[derive(Deserialize)]
struct PartOut {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl Provider for Gemini {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base.trim_end_matches('/'),
            self.model
        );
        let body = GenerateRequest {
            contents: vec![Content { role: "user", parts: vec![PartIn { text: prompt }] }],
            generation_config: GenerationConfig { temperature: 0.7 },
        };
        tracing::debug!(provider = NAME, %url, prompt_chars = prompt.chars().count(), "POST");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport(NAME, e))?;
        let text = read_body(NAME, resp).await?;

        let parsed: GenerateResponse = decode(NAME, &text)?;
        // a blocked prompt comes back as 200 with no candidates
        let joined = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect::<String>());
        non_empty(NAME, joined)
    }
}
