//! Test fixtures and data generators
//!
//! Provides client options tuned for fast tests and the server payloads the
//! mock gateway sends.

use std::time::Duration;

use nyx_gateway::{GatewayIntents, GatewayOptions, ReconnectPolicy, ShardMode};
use serde_json::{json, Value};

/// Token accepted by option validation
pub const TEST_TOKEN: &str = "MTA1.GhIjKl.abcdefghijklmnop";

/// Heartbeat interval long enough that no beat is due during a test
pub const SLOW_HEARTBEAT_MS: u64 = 45_000;

/// Single-shard options with near-zero reconnect and identify delays
pub fn test_options() -> GatewayOptions {
    let mut options = GatewayOptions::new(
        format!("Bot {TEST_TOKEN}"),
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES,
    );
    options.shard_mode = ShardMode::Single;
    options.reconnect = ReconnectPolicy::new(vec![Duration::from_millis(10)], 5);
    options.identify_delay = Duration::from_millis(10);
    options
}

pub fn hello(heartbeat_interval: u64) -> Value {
    json!({ "op": 10, "d": { "heartbeat_interval": heartbeat_interval } })
}

pub fn ready(session_id: &str, sequence: u64, resume_url: &str) -> Value {
    json!({
        "op": 0,
        "t": "READY",
        "s": sequence,
        "d": {
            "v": 10,
            "session_id": session_id,
            "resume_gateway_url": resume_url,
            "shard": [0, 1]
        }
    })
}

pub fn resumed(sequence: u64) -> Value {
    json!({ "op": 0, "t": "RESUMED", "s": sequence, "d": null })
}

pub fn dispatch(event: &str, sequence: u64, data: Value) -> Value {
    json!({ "op": 0, "t": event, "s": sequence, "d": data })
}

pub fn heartbeat_request() -> Value {
    json!({ "op": 1, "d": null })
}

pub fn invalid_session(resumable: bool) -> Value {
    json!({ "op": 9, "d": resumable })
}

pub fn reconnect() -> Value {
    json!({ "op": 7, "d": null })
}
