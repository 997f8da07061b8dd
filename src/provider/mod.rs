use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::cli::ProviderKind;
use crate::config::Config;
use crate::errors::{ConfigError, GenerationError};

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;

/// One text-generation backend. A call is a single HTTP request: no retry, no caching.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

pub type DynProvider = Box<dyn Provider + Send + Sync>;

/// Builds the configured backend. Fails when its credential is missing from the environment.
pub fn make_provider(cfg: &Config) -> Result<DynProvider, ConfigError> {
    let credential = cfg.credential()?;
    let model = cfg.model().to_string();
    let base = cfg.base_url().to_string();
    let timeout = Duration::from_secs(cfg.timeout_secs);
    let key = credential.unwrap_or_default();

    let provider: DynProvider = match cfg.provider {
        ProviderKind::Gemini => Box::new(gemini::Gemini::new(model, key, base, timeout)?),
        ProviderKind::OpenAI => Box::new(openai::OpenAIProvider::new(model, key, base, timeout)?),
        ProviderKind::Anthropic => Box::new(anthropic::Anthropic::new(model, key, base, timeout)?),
        ProviderKind::Ollama => Box::new(ollama::Ollama::new(model, base, timeout)?),
    };
    tracing::info!(provider = provider.name(), model = cfg.model(), "provider ready");
    Ok(provider)
}

pub(crate) fn http_client(timeout: Duration) -> Result<Client, ConfigError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))
}

pub(crate) fn transport(provider: &'static str, err: reqwest::Error) -> GenerationError {
    let message = if err.is_timeout() { format!("timed out: {err}") } else { err.to_string() };
    GenerationError::Transport { provider, message }
}

/// Maps a non-success status to an error. 401/403 mean the credential was rejected.
pub(crate) fn status_error(provider: &'static str, status: StatusCode, body: String) -> GenerationError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            GenerationError::Unauthorized { provider, status: status.as_u16() }
        }
        _ => GenerationError::Service { provider, status: status.as_u16(), body },
    }
}

/// Reads the body, failing on non-success status.
pub(crate) async fn read_body(
    provider: &'static str,
    resp: reqwest::Response,
) -> Result<String, GenerationError> {
    let status = resp.status();
    let text = resp.text().await.map_err(|e| transport(provider, e))?;
    tracing::debug!(provider, %status, bytes = text.len(), "raw response");
    if !status.is_success() {
        return Err(status_error(provider, status, text));
    }
    Ok(text)
}

pub(crate) fn non_empty(provider: &'static str, text: Option<String>) -> Result<String, GenerationError> {
    match text {
        Some(t) if !t.trim().is_empty() => Ok(t),
        _ => Err(GenerationError::EmptyResponse { provider }),
    }
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    provider: &'static str,
    text: &str,
) -> Result<T, GenerationError> {
    serde_json::from_str(text).map_err(|e| GenerationError::Decode { provider, message: e.to_string() })
}
