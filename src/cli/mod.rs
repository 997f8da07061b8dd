use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    #[value(alias = "google")]
    Gemini,
    #[value(alias = "openai")]
    OpenAI,
    Anthropic,
    Ollama,
}

impl ProviderKind {
    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini-2.0-flash",
            ProviderKind::OpenAI => "gpt-4.1-mini",
            ProviderKind::Anthropic => "claude-3-5-sonnet-latest",
            ProviderKind::Ollama => "llama3.1",
        }
    }

    /// Environment variable holding the credential, if the backend needs one.
    pub fn credential_var(self) -> Option<&'static str> {
        match self {
            ProviderKind::Gemini => Some("GEMINI_API_KEY"),
            ProviderKind::OpenAI => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::Ollama => None,
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
            ProviderKind::OpenAI => "https://api.openai.com",
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::Ollama => "http://localhost:11434",
        }
    }
}

#[derive(Parser, Debug, Default)]
#[command(
    name = "pitch_wizard",
    version,
    about = "Step-by-step business ideation wizard that turns a technology seed into a pitch draft"
)]
pub struct Args {
    #[arg(long, value_enum)]
    pub provider: Option<ProviderKind>,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// TOML file with defaults; CLI flags win over it.
    #[arg(long)]
    pub config: Option<String>,

    /// Ground market and competitor prompts with Google Programmable Search.
    #[arg(long, default_value_t = false)]
    pub search: bool,

    #[arg(long)]
    pub max_search_results: Option<usize>,

    /// Write every prompt, response and the final session to disk.
    #[arg(long, default_value_t = false)]
    pub save_transcript: bool,

    #[arg(long)]
    pub transcript_dir: Option<String>,

    /// Skip the wizard and generate a single pitch outline from the technology summary.
    #[arg(long, default_value_t = false)]
    pub quick: bool,

    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from([
            "pitch_wizard",
            "--provider",
            "open-ai",
            "--model",
            "m",
            "--search",
            "--max-search-results",
            "3",
            "--quick",
        ])
        .unwrap();
        assert_eq!(args.provider, Some(ProviderKind::OpenAI));
        assert_eq!(args.model.as_deref(), Some("m"));
        assert!(args.search);
        assert_eq!(args.max_search_results, Some(3));
        assert!(args.quick);
        assert!(!args.debug);
    }

    #[test]
    fn defaults_to_gemini() {
        assert_eq!(ProviderKind::default(), ProviderKind::Gemini);
        assert_eq!(ProviderKind::Ollama.credential_var(), None);
    }
}
