use feynman_tutor_core::TutorSettings;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Defines the supported generation backends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    OpenAI,
    Gemini,
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Provider::Ollama),
            "openai" => Ok(Provider::OpenAI),
            "gemini" => Ok(Provider::Gemini),
            other => Err(ConfigError::InvalidValue(
                "LLM_PROVIDER".to_string(),
                format!("'{}' is not one of ollama, openai, gemini", other),
            )),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub provider: Provider,
    pub ollama_base_url: String,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub chat_model: String,
    /// Base URL of the retrieval index. Without it no corpus is ever found.
    pub retrieval_url: Option<String>,
    pub retrieval_top_k: usize,
    pub retrieval_timeout_secs: u64,
    pub classifier_timeout_secs: u64,
    pub passage_excerpt_chars: usize,
    pub log_level: Level,
    pub prompts_path: PathBuf,
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let provider = std::env::var("LLM_PROVIDER")
            .unwrap_or_else(|_| "ollama".to_string())
            .parse::<Provider>()?;

        let ollama_base_url = std::env::var("OLLAMA_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:11434".to_string());
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();

        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "llama3.1:8b".to_string());

        let retrieval_url = std::env::var("RETRIEVAL_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        let retrieval_top_k = parse_var("RETRIEVAL_TOP_K", 5usize)?;
        let retrieval_timeout_secs = parse_var("RETRIEVAL_TIMEOUT_SECS", 10u64)?;
        let classifier_timeout_secs = parse_var("CLASSIFIER_TIMEOUT_SECS", 15u64)?;
        let passage_excerpt_chars = parse_var("PASSAGE_EXCERPT_CHARS", 200usize)?;
        if retrieval_top_k == 0 {
            return Err(ConfigError::InvalidValue(
                "RETRIEVAL_TOP_K".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        match provider {
            Provider::Ollama => {}
            Provider::OpenAI => {
                if openai_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
                    ));
                }
            }
            Provider::Gemini => {
                if gemini_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "GEMINI_API_KEY must be set for 'gemini' provider".to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            bind_address,
            database_url,
            provider,
            ollama_base_url,
            openai_api_key,
            gemini_api_key,
            chat_model,
            retrieval_url,
            retrieval_top_k,
            retrieval_timeout_secs,
            classifier_timeout_secs,
            passage_excerpt_chars,
            log_level,
            prompts_path,
        })
    }

    /// The orchestrator tunables carried by this configuration.
    pub fn tutor_settings(&self) -> TutorSettings {
        TutorSettings {
            top_k: self.retrieval_top_k,
            retrieval_timeout: Duration::from_secs(self.retrieval_timeout_secs),
            classifier_timeout: Duration::from_secs(self.classifier_timeout_secs),
            passage_excerpt_chars: self.passage_excerpt_chars,
        }
    }
}
