//! Gateway configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Only `OPENAI_API_KEY` is mandatory.

use std::fmt;
use std::net::SocketAddr;

use crate::service::CompletionSettings;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Provide clear, concise, and helpful responses.";

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Top-level gateway configuration.
///
/// Loaded once at startup via [`GatewayConfig::from_env`].
#[derive(Clone)]
pub struct GatewayConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:8000`).
    pub listen_addr: SocketAddr,

    /// Bearer credential for the completion API.
    pub openai_api_key: String,

    /// Root URL of the OpenAI-compatible API.
    pub openai_base_url: String,

    /// Model identifier sent with every completion.
    pub openai_model: String,

    /// Sampling temperature.
    pub temperature: f32,

    /// Upper bound on generated tokens per completion.
    pub max_output_tokens: u32,

    /// Seconds allowed for establishing the provider connection.
    pub connect_timeout_secs: u64,

    /// System turn prepended to every conversation.
    pub system_prompt: String,

    /// Allowed CORS origins; `["*"]` allows any origin.
    pub cors_origins: Vec<String>,

    /// Longest message accepted by `POST /api/chat`, in characters.
    pub max_message_chars: usize,

    /// Prior turns kept per WebSocket connection (0 disables context).
    pub history_max_turns: usize,

    /// Log output format.
    pub log_format: LogFormat,
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file,
    /// then falls back to defaults for every optional key.
    ///
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is missing or empty, or if
    /// `LISTEN_ADDR` is set but cannot be parsed as a [`SocketAddr`].
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`GatewayConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr: SocketAddr = lookup("LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8000".to_string())
            .parse()?;

        let openai_api_key = lookup("OPENAI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or("OPENAI_API_KEY is not set in environment variables")?;

        let openai_base_url = lookup("OPENAI_BASE_URL")
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let openai_model = lookup("OPENAI_MODEL").unwrap_or_else(|| "gpt-3.5-turbo".to_string());
        let temperature = parse_key(&lookup, "OPENAI_TEMPERATURE", 0.7);
        let max_output_tokens = parse_key(&lookup, "OPENAI_MAX_TOKENS", 1000);
        let connect_timeout_secs = parse_key(&lookup, "OPENAI_CONNECT_TIMEOUT_SECS", 30);
        let system_prompt =
            lookup("SYSTEM_PROMPT").unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        let cors_origins = lookup("CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| vec!["http://localhost:3000".to_string()]);

        let max_message_chars = parse_key(&lookup, "MAX_MESSAGE_CHARS", 1000);
        let history_max_turns = parse_key(&lookup, "HISTORY_MAX_TURNS", 20);

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            Some("json") | Some("JSON") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            listen_addr,
            openai_api_key,
            openai_base_url,
            openai_model,
            temperature,
            max_output_tokens,
            connect_timeout_secs,
            system_prompt,
            cors_origins,
            max_message_chars,
            history_max_turns,
            log_format,
        })
    }

    /// Model parameters for the chat service.
    #[must_use]
    pub fn completion_settings(&self) -> CompletionSettings {
        CompletionSettings {
            model: self.openai_model.clone(),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
            system_prompt: self.system_prompt.clone(),
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("listen_addr", &self.listen_addr)
            .field("openai_api_key", &"<redacted>")
            .field("openai_base_url", &self.openai_base_url)
            .field("openai_model", &self.openai_model)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("cors_origins", &self.cors_origins)
            .field("max_message_chars", &self.max_message_chars)
            .field("history_max_turns", &self.history_max_turns)
            .field("log_format", &self.log_format)
            .finish_non_exhaustive()
    }
}

/// Parses `key` as `T`, returning `default` on missing or invalid values.
fn parse_key<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<GatewayConfig, Box<dyn std::error::Error>> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let Ok(config) = load(&[("OPENAI_API_KEY", "sk-test")]) else {
            panic!("config should load");
        };
        assert_eq!(config.listen_addr.port(), 8000);
        assert_eq!(config.openai_model, "gpt-3.5-turbo");
        assert_eq!(config.max_output_tokens, 1000);
        assert_eq!(config.max_message_chars, 1000);
        assert_eq!(config.history_max_turns, 20);
        assert_eq!(config.cors_origins, vec!["http://localhost:3000"]);
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn missing_api_key_is_an_error() {
        assert!(load(&[]).is_err());
        assert!(load(&[("OPENAI_API_KEY", "  ")]).is_err());
    }

    #[test]
    fn invalid_listen_addr_is_an_error() {
        assert!(load(&[("OPENAI_API_KEY", "k"), ("LISTEN_ADDR", "nope")]).is_err());
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let Ok(config) = load(&[
            ("OPENAI_API_KEY", "k"),
            ("OPENAI_MAX_TOKENS", "lots"),
            ("HISTORY_MAX_TURNS", "4"),
        ]) else {
            panic!("config should load");
        };
        assert_eq!(config.max_output_tokens, 1000);
        assert_eq!(config.history_max_turns, 4);
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let Ok(config) = load(&[
            ("OPENAI_API_KEY", "k"),
            ("CORS_ORIGINS", "http://a.test, http://b.test ,"),
        ]) else {
            panic!("config should load");
        };
        assert_eq!(config.cors_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let Ok(config) = load(&[("OPENAI_API_KEY", "sk-very-secret")]) else {
            panic!("config should load");
        };
        assert!(!format!("{config:?}").contains("sk-very-secret"));
    }
}
