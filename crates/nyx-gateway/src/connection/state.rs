//! Connection state

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle of a shard's socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No socket
    #[default]
    Disconnected,
    /// Socket opening
    Connecting,
    /// Socket open, Identify pending or sent
    Identifying,
    /// Socket open, Resume sent
    Resuming,
    /// Session established
    Ready,
    /// Socket closing
    Closing,
}

impl ConnectionState {
    /// Whether frames can be written to the socket
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Identifying | Self::Resuming | Self::Ready)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Ready => "ready",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Snapshot of a shard published by its runner
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardStatus {
    pub state: ConnectionState,
    /// Latest heartbeat round trip
    pub latency: Option<Duration>,
    /// Consecutive unacknowledged heartbeats
    pub missed: u32,
    pub session_id: Option<String>,
    pub sequence: Option<u64>,
    /// Reconnects since the last READY or RESUMED
    pub attempts: u32,
}
