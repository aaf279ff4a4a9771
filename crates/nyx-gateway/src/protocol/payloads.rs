//! Payload definitions
//!
//! Data carried in the `d` field of handshake and command frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::{Validate, ValidationError};

/// Payload for op 10 (Hello)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// Payload for op 2 (Identify)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Authentication token
    pub token: String,

    /// Client connection properties
    pub properties: IdentifyProperties,

    /// Payload compression (transport compression is negotiated in the URL instead)
    #[serde(default)]
    pub compress: bool,

    /// Member count above which offline members are omitted
    pub large_threshold: u8,

    /// `[shard_id, shard_count]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,

    /// Initial presence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<UpdatePresence>,

    /// Gateway intents bitmask
    pub intents: u64,
}

/// Client connection properties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyProperties {
    /// Operating system
    pub os: String,

    /// Library name
    pub browser: String,

    /// Library name
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: env!("CARGO_PKG_NAME").to_string(),
            device: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

/// Payload for op 6 (Resume)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Authentication token
    pub token: String,

    /// Session ID to resume
    pub session_id: String,

    /// Last received sequence number
    pub seq: u64,
}

/// The subset of the READY dispatch the connection needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyPayload {
    /// Session ID used for resuming
    pub session_id: String,

    /// URL to reconnect to when resuming
    #[serde(default)]
    pub resume_gateway_url: Option<String>,

    /// `[shard_id, shard_count]` echoed by the server
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
}

/// Payload for op 3 (Presence Update), also used as the initial presence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct UpdatePresence {
    /// Unix time in milliseconds the client went idle
    pub since: Option<u64>,

    /// Activities; opaque to the gateway
    #[validate(length(max = 10, message = "At most 10 activities"))]
    #[serde(default)]
    pub activities: Vec<Value>,

    /// New status
    #[validate(custom(function = "validate_status"))]
    pub status: String,

    /// Whether the client is AFK
    #[serde(default)]
    pub afk: bool,
}

impl UpdatePresence {
    /// Valid status values
    pub const VALID_STATUSES: &'static [&'static str] =
        &["online", "dnd", "idle", "invisible", "offline"];

    /// A presence with just a status
    #[must_use]
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            since: None,
            activities: Vec::new(),
            status: status.into(),
            afk: false,
        }
    }
}

fn validate_status(status: &str) -> Result<(), ValidationError> {
    if UpdatePresence::VALID_STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_status"))
    }
}

/// Payload for op 4 (Voice State Update)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateVoiceState {
    /// Guild snowflake
    #[validate(custom(function = "validate_snowflake"))]
    pub guild_id: String,

    /// Channel to join, `None` to disconnect
    pub channel_id: Option<String>,

    /// Whether the client is muted
    pub self_mute: bool,

    /// Whether the client is deafened
    pub self_deaf: bool,
}

/// Payload for op 8 (Request Guild Members)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RequestGuildMembers {
    /// Guild snowflake
    #[validate(custom(function = "validate_snowflake"))]
    pub guild_id: String,

    /// Username prefix to match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Maximum members to return (0 for all when querying with "")
    pub limit: u32,

    /// Include presences of matched members
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presences: Option<bool>,

    /// Specific users to fetch
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 100, message = "At most 100 user ids"))]
    pub user_ids: Option<Vec<String>>,

    /// Echoed back in the member chunk events
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 32, message = "Nonce must be at most 32 bytes"))]
    pub nonce: Option<String>,
}

fn validate_snowflake(id: &str) -> Result<(), ValidationError> {
    id.parse::<u64>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid_snowflake"))
}

/// Parse a snowflake string already checked by validation
pub(crate) fn snowflake(id: &str) -> u64 {
    id.parse().unwrap_or_default()
}
