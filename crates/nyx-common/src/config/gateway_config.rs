//! Gateway client configuration
//!
//! Loads connection settings from environment variables (and a `.env` file
//! when present). Values stay untyped strings/integers here; the gateway
//! crate turns them into validated options.

use serde::Deserialize;
use std::env;

/// Main configuration for a gateway client process
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub app: AppSettings,
    /// Bot token used for Identify/Resume and REST metadata calls
    pub token: String,
    /// REST base URL used to fetch connection metadata
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Gateway API version
    #[serde(default = "default_api_version")]
    pub api_version: u8,
    /// Intents bitmask
    #[serde(default = "default_intents")]
    pub intents: u64,
    /// Payload encoding name ("json" or "msgpack")
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// Transport compression name ("zlib-stream" or "zstd-stream")
    #[serde(default)]
    pub compression: Option<String>,
    pub shards: ShardConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

/// Sharding configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShardConfig {
    /// Fixed total shard count; `None` uses the server recommendation
    #[serde(default)]
    pub total: Option<u32>,
    /// Guilds per shard used when recalculating the shard count
    #[serde(default)]
    pub guilds_per_shard: Option<u32>,
    /// Maximum reconnect attempts per shard
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

// Default value functions
fn default_app_name() -> String {
    "nyx-gateway".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_api_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_api_version() -> u8 {
    10
}

fn default_intents() -> u64 {
    513 // GUILDS | GUILD_MESSAGES
}

fn default_encoding() -> String {
    "json".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

/// Parse an optional numeric environment variable, rejecting garbage
fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(None),
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `NYX_TOKEN` is missing or a numeric variable does not parse
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Ok(Self {
            app: AppSettings {
                name: env::var("APP_NAME").unwrap_or_else(|_| default_app_name()),
                env: env::var("APP_ENV")
                    .ok()
                    .and_then(|s| Environment::parse(&s))
                    .unwrap_or_default(),
            },
            token: env::var("NYX_TOKEN").map_err(|_| ConfigError::MissingVar("NYX_TOKEN"))?,
            api_url: env::var("NYX_API_URL").unwrap_or_else(|_| default_api_url()),
            api_version: parse_var("NYX_API_VERSION")?.unwrap_or_else(default_api_version),
            intents: parse_var("NYX_INTENTS")?.unwrap_or_else(default_intents),
            encoding: env::var("NYX_ENCODING").unwrap_or_else(|_| default_encoding()),
            compression: env::var("NYX_COMPRESSION")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            shards: ShardConfig {
                total: parse_var("NYX_SHARD_COUNT")?,
                guilds_per_shard: parse_var("NYX_GUILDS_PER_SHARD")?,
                max_reconnect_attempts: parse_var("NYX_MAX_RECONNECT_ATTEMPTS")?
                    .unwrap_or_else(default_max_reconnect_attempts),
            },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
