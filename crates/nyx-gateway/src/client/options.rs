//! Client options
//!
//! Everything the client needs to identify, validated once at construction.

use crate::codec::{CompressionType, Encoding, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::connection::ReconnectPolicy;
use crate::error::GatewayError;
use crate::heartbeat::DEFAULT_MAX_MISSED;
use crate::protocol::{GatewayIntents, IdentifyProperties, UpdatePresence};
use crate::shard::DEFAULT_IDENTIFY_DELAY;
use nyx_common::GatewayConfig;
use serde::Serialize;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Gateway API version spoken by this crate
pub const DEFAULT_API_VERSION: u8 = 10;

/// Default large guild threshold
pub const DEFAULT_LARGE_THRESHOLD: u8 = 50;

/// Latency above which a shard is reported unhealthy
pub const DEFAULT_LATENCY_CEILING: Duration = Duration::from_secs(10);

/// Frames a socket may send per minute
pub const DEFAULT_COMMANDS_PER_MINUTE: u32 = 120;

/// Which shards this process runs
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardMode {
    /// Every shard, count taken from the server recommendation
    #[default]
    Auto,
    /// The given shard IDs out of `total`
    Fixed { ids: Vec<u32>, total: u32 },
    /// Shard 0 of 1
    Single,
}

/// Gateway client options
#[derive(Debug, Clone, Validate)]
pub struct GatewayOptions {
    /// Bot token; a leading `Bot ` is accepted and stripped
    #[validate(custom(function = "validate_token"))]
    pub token: String,

    pub intents: GatewayIntents,

    /// Member count above which offline members are omitted
    #[validate(range(min = 50, max = 250, message = "large_threshold must be within 50..=250"))]
    pub large_threshold: u8,

    #[validate(range(min = 6, message = "Gateway versions below 6 are unsupported"))]
    pub version: u8,

    pub encoding: Encoding,

    pub compression: Option<CompressionType>,

    #[validate(custom(function = "validate_shard_mode"))]
    pub shard_mode: ShardMode,

    /// Enables load-based shard recalculation
    pub guilds_per_shard: Option<u64>,

    /// Unacknowledged heartbeats before a socket counts as zombied
    #[validate(range(min = 1, message = "max_missed_heartbeats must be at least 1"))]
    pub max_missed_heartbeats: u32,

    pub reconnect: ReconnectPolicy,

    /// Gap between identifies within one bucket
    pub identify_delay: Duration,

    #[validate(range(min = 128, message = "max_payload_size must be at least 128 bytes"))]
    pub max_payload_size: usize,

    /// Application commands per socket per minute
    #[validate(range(min = 1, max = 120, message = "commands_per_minute must be within 1..=120"))]
    pub commands_per_minute: u32,

    /// Latency above which `is_healthy` fails
    pub latency_ceiling: Duration,

    /// Initial presence sent with Identify
    #[validate(nested)]
    pub presence: Option<UpdatePresence>,

    pub properties: IdentifyProperties,
}

impl GatewayOptions {
    /// Options with defaults for everything but credentials
    pub fn new(token: impl Into<String>, intents: GatewayIntents) -> Self {
        Self {
            token: token.into(),
            intents,
            large_threshold: DEFAULT_LARGE_THRESHOLD,
            version: DEFAULT_API_VERSION,
            encoding: Encoding::Json,
            compression: None,
            shard_mode: ShardMode::Auto,
            guilds_per_shard: None,
            max_missed_heartbeats: DEFAULT_MAX_MISSED,
            reconnect: ReconnectPolicy::default(),
            identify_delay: DEFAULT_IDENTIFY_DELAY,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            commands_per_minute: DEFAULT_COMMANDS_PER_MINUTE,
            latency_ceiling: DEFAULT_LATENCY_CEILING,
            presence: None,
            properties: IdentifyProperties::default(),
        }
    }

    /// Build options from environment configuration
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let intents = GatewayIntents::from_bits(config.intents).ok_or_else(|| {
            GatewayError::Protocol(format!("unknown intent bits in {:#x}", config.intents))
        })?;

        let mut options = Self::new(config.token.clone(), intents);
        options.version = config.api_version;
        options.encoding = config.encoding.parse()?;
        options.compression = config
            .compression
            .as_deref()
            .map(str::parse::<CompressionType>)
            .transpose()?;
        options.guilds_per_shard = config.shards.guilds_per_shard.map(u64::from);
        options.reconnect = ReconnectPolicy::new(
            options.reconnect.delays().to_vec(),
            config.shards.max_reconnect_attempts,
        );
        if let Some(total) = config.shards.total {
            options.shard_mode = ShardMode::Fixed {
                ids: (0..total).collect(),
                total,
            };
        }

        Ok(options)
    }

    /// The token without any `Bot ` prefix
    #[must_use]
    pub fn normalized_token(&self) -> &str {
        strip_prefix(&self.token)
    }
}

fn strip_prefix(token: &str) -> &str {
    token.strip_prefix("Bot ").unwrap_or(token).trim()
}

fn validate_token(token: &str) -> Result<(), ValidationError> {
    let token = strip_prefix(token);
    if token.is_empty() {
        return Err(ValidationError::new("empty_token"));
    }
    if token.chars().any(char::is_whitespace) {
        return Err(ValidationError::new("token_whitespace"));
    }
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(ValidationError::new("token_shape"));
    }
    Ok(())
}

fn validate_shard_mode(mode: &ShardMode) -> Result<(), ValidationError> {
    match mode {
        ShardMode::Fixed { ids, total } => {
            if *total == 0 || ids.is_empty() {
                return Err(ValidationError::new("empty_shard_set"));
            }
            if ids.iter().any(|id| id >= total) {
                return Err(ValidationError::new("shard_id_out_of_range"));
            }
            Ok(())
        }
        ShardMode::Auto | ShardMode::Single => Ok(()),
    }
}
