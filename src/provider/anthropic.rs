use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{decode, non_empty, read_body, transport, Provider};
use crate::errors::{ConfigError, GenerationError};

const NAME: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";

pub struct Anthropic {
    model: String,
    api_key: String,
    api_base: String,
    client: Client,
}

impl Anthropic {
    pub fn new(model: String, api_key: String, api_base: String, timeout: Duration) -> Result<Self, ConfigError> {
        Ok(Self { model, api_key, api_base, client: super::http_client(timeout)? })
    }
}

#[derive(Serialize)]
struct MsgRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Msg<'a>>,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MsgResponse {
    #[serde(default)]
    content: Vec<Block>,
}

#[derive(Deserialize)]
struct Block {
    #[serde(default)]
    text: String,
    #[serde(default)]
    r#type: String,
}

#[async_trait]
impl Provider for Anthropic {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let url = format!("{}/v1/messages", self.api_base.trim_end_matches('/'));
        let body = MsgRequest {
            model: &self.model,
            max_tokens: 4096,
            messages: vec![Msg { role: "user", content: prompt }],
        };
        tracing::debug!(provider = NAME, %url, prompt_chars = prompt.chars().count(), "POST");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport(NAME, e))?;
        let text = read_body(NAME, resp).await?;

        let parsed: MsgResponse = decode(NAME, &text)?;
        let joined: String = parsed
            .content
            .into_iter()
            .filter(|b| b.r#type == "text")
            .map(|b| b.text)
            .collect();
        non_empty(NAME, Some(joined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(base: &str) -> Anthropic {
        Anthropic::new("claude-test".into(), "ak".into(), base.into(), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn joins_text_blocks() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "ak")
            .match_header("anthropic-version", API_VERSION)
            .with_status(200)
            .with_body(r#"{"content":[{"type":"text","text":"a"},{"type":"tool_use","id":"x"},{"type":"text","text":"b"}]}"#)
            .expect(1)
            .create_async()
            .await;

        assert_eq!(provider(&server.url()).generate("p").await.unwrap(), "ab");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn no_text_is_empty_response() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(r#"{"content":[]}"#)
            .create_async()
            .await;

        let err = provider(&server.url()).generate("p").await.unwrap_err();
        assert_eq!(err, GenerationError::EmptyResponse { provider: "anthropic" });
    }
}
