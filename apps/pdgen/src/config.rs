use anyhow::{Context, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_MAX_TOKENS: u32 = 1500;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Settings for the chat-completions service. Passed to `LlmClient::new`.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

/// Application configuration loaded from environment variables.
/// Fails at startup if the API credential is missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub model: ModelSettings,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            model: ModelSettings {
                api_key: require_env("OPENAI_API_KEY")?,
                base_url: std::env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
                model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
                max_tokens: parse_env("OPENAI_MAX_TOKENS", DEFAULT_MAX_TOKENS)?,
                timeout_secs: parse_env("OPENAI_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?,
            },
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Applies command-line overrides on top of the environment.
    pub fn with_overrides(
        mut self,
        model: Option<String>,
        max_tokens: Option<u32>,
        timeout_secs: Option<u64>,
    ) -> Self {
        if let Some(model) = model {
            self.model.model = model;
        }
        if let Some(max_tokens) = max_tokens {
            self.model.max_tokens = max_tokens;
        }
        if let Some(timeout_secs) = timeout_secs {
            self.model.timeout_secs = timeout_secs;
        }
        self
    }
}

fn require_env(key: &str) -> Result<String> {
    let value = std::env::var(key)
        .with_context(|| format!("Required environment variable '{key}' is not set"))?;
    if value.trim().is_empty() {
        anyhow::bail!("Required environment variable '{key}' is empty");
    }
    Ok(value)
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}
