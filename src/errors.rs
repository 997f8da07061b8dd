use thiserror::Error;

use crate::session::StepId;

/// Failures of a single call to the text-generation service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("credential rejected by {provider} ({status})")]
    Unauthorized { provider: &'static str, status: u16 },
    #[error("{provider} request failed: {message}")]
    Transport { provider: &'static str, message: String },
    #[error("{provider} API error ({status}): {body}")]
    Service { provider: &'static str, status: u16, body: String },
    #[error("{provider} returned an empty response")]
    EmptyResponse { provider: &'static str },
    #[error("{provider} response parse error: {message}")]
    Decode { provider: &'static str, message: String },
}

impl GenerationError {
    /// A rejected credential will never succeed on retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GenerationError::Unauthorized { .. })
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    MissingCredential(&'static str),
    #[error("failed to read config {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("invalid config {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Transport(String),
    #[error("search API error ({status}): {body}")]
    Service { status: u16, body: String },
    #[error("search response parse error: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum WizardError {
    #[error("{0}")]
    Validation(String),
    #[error("cannot move from step {from} to step {to}")]
    InvalidTransition { from: StepId, to: StepId },
    #[error("{action} is not available at step {step}")]
    Unsupported { action: &'static str, step: StepId },
    #[error("generation for {what} failed: {source}")]
    Generation { what: String, source: GenerationError },
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl WizardError {
    pub fn validation(msg: impl Into<String>) -> Self {
        WizardError::Validation(msg.into())
    }
}
