use gemini_realtime::LIVE_API_URL;
use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_VOICE: &str = "Fenrir";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub gemini_api_key: SecretString,
    /// WebSocket endpoint of the Live API.
    pub live_api_url: String,
    pub model: String,
    pub voice_name: String,
    /// Offer the model web search next to the HUD tools.
    pub google_search: bool,
    pub log_level: Level,
    pub prompts_path: PathBuf,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let live_api_url =
            std::env::var("GEMINI_LIVE_URL").unwrap_or_else(|_| LIVE_API_URL.to_string());

        let model = std::env::var("GEMINI_MODEL")
            .map(|model| {
                if model.starts_with("models/") {
                    model
                } else {
                    format!("models/{model}")
                }
            })
            .unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let voice_name = std::env::var("VOICE_NAME").unwrap_or_else(|_| DEFAULT_VOICE.to_string());

        let google_search = match std::env::var("GOOGLE_SEARCH") {
            Ok(value) => parse_flag(&value).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "GOOGLE_SEARCH".to_string(),
                    format!("'{}' is not a boolean", value),
                )
            })?,
            Err(_) => true,
        };

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

        Ok(Self {
            bind_address,
            gemini_api_key,
            live_api_url,
            model,
            voice_name,
            google_search,
            log_level,
            prompts_path,
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
