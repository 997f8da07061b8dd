use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::cli::{Args, ProviderKind};
use crate::errors::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderKind,
    /// Empty means the provider's default model.
    pub model: String,
    /// Overrides the provider's API endpoint (proxies, tests, remote Ollama).
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub search: bool,
    pub max_search_results: usize,
    pub search_base_url: Option<String>,
    pub save_transcript: bool,
    pub transcript_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Gemini,
            model: String::new(),
            base_url: None,
            timeout_secs: 180,
            search: false,
            max_search_results: 5,
            search_base_url: None,
            save_transcript: false,
            transcript_dir: ".pitch_wizard/transcripts".into(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs_err::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Config file (if any) with CLI flags applied on top.
    pub fn resolve(args: &Args) -> Result<Self, ConfigError> {
        let mut cfg = match &args.config {
            Some(p) => Self::load(Path::new(p))?,
            None => Self::default(),
        };
        cfg.apply_args(args);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_args(&mut self, args: &Args) {
        if let Some(p) = args.provider {
            if p != self.provider {
                // a model configured for another backend would not exist here
                self.model.clear();
            }
            self.provider = p;
        }
        if let Some(m) = &args.model {
            self.model = m.clone();
        }
        if let Some(t) = args.timeout_secs {
            self.timeout_secs = t;
        }
        if let Some(n) = args.max_search_results {
            self.max_search_results = n;
        }
        if let Some(d) = &args.transcript_dir {
            self.transcript_dir = d.clone();
        }
        self.search |= args.search;
        self.save_transcript |= args.save_transcript;
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be positive".into()));
        }
        if self.max_search_results == 0 || self.max_search_results > 10 {
            return Err(ConfigError::Invalid("max_search_results must be between 1 and 10".into()));
        }
        Ok(())
    }

    pub fn model(&self) -> &str {
        if self.model.trim().is_empty() {
            self.provider.default_model()
        } else {
            &self.model
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or_else(|| self.provider.default_base_url())
    }

    /// Reads the provider credential from the environment.
    pub fn credential(&self) -> Result<Option<String>, ConfigError> {
        let Some(var) = self.provider.credential_var() else {
            return Ok(None);
        };
        match std::env::var(var) {
            Ok(v) if !v.trim().is_empty() => Ok(Some(v)),
            _ => Err(ConfigError::MissingCredential(var)),
        }
    }
}
