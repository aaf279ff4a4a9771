//! Public gateway events
//!
//! Everything the client reports to the application flows through one
//! [`GatewayEvent`] stream.

use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Events emitted by the gateway client
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// A shard is opening its socket
    Connecting { shard_id: u32, url: String },
    /// A shard's socket is open
    Connected { shard_id: u32 },
    /// Every shard has a live session
    Ready { shard_count: u32 },
    /// A shard will reopen its socket after `delay`
    Reconnecting {
        shard_id: u32,
        attempt: u32,
        delay: Duration,
        resume: bool,
    },
    /// READY received; a new session exists
    SessionStart { shard_id: u32, session_id: String },
    /// RESUMED received; the previous session continues
    SessionResumed { shard_id: u32, session_id: String },
    /// A session was dropped and will not be resumed
    SessionEnd {
        shard_id: u32,
        session_id: Option<String>,
    },
    /// The server sent Invalid Session
    SessionInvalid { shard_id: u32, resumable: bool },
    /// A socket closed
    Close {
        shard_id: u32,
        code: Option<u16>,
        reason: String,
    },
    /// A heartbeat was written
    HeartbeatSent {
        shard_id: u32,
        sequence: Option<u64>,
    },
    /// A heartbeat was acknowledged
    HeartbeatAck { shard_id: u32, latency: Duration },
    /// Heartbeats went unacknowledged
    HeartbeatTimeout { shard_id: u32, missed: u32 },
    /// A shard finished its handshake
    ShardReady { shard_id: u32 },
    /// A shard lost its socket
    ShardDisconnect { shard_id: u32, code: Option<u16> },
    /// A shard reopened its socket after losing it
    ShardReconnect { shard_id: u32 },
    /// An event dispatched by the server
    Dispatch {
        shard_id: u32,
        event: String,
        sequence: Option<u64>,
        data: Value,
    },
    /// Diagnostic message
    Debug {
        shard_id: Option<u32>,
        message: String,
    },
    /// Recoverable problem
    Warn {
        shard_id: Option<u32>,
        message: String,
    },
    /// Unrecoverable problem; the shard has stopped
    Error {
        shard_id: Option<u32>,
        message: String,
    },
}

impl GatewayEvent {
    /// Shard the event belongs to, if any
    #[must_use]
    pub fn shard_id(&self) -> Option<u32> {
        match self {
            Self::Ready { .. } => None,
            Self::Debug { shard_id, .. } | Self::Warn { shard_id, .. } | Self::Error { shard_id, .. } => {
                *shard_id
            }
            Self::Connecting { shard_id, .. }
            | Self::Connected { shard_id }
            | Self::Reconnecting { shard_id, .. }
            | Self::SessionStart { shard_id, .. }
            | Self::SessionResumed { shard_id, .. }
            | Self::SessionEnd { shard_id, .. }
            | Self::SessionInvalid { shard_id, .. }
            | Self::Close { shard_id, .. }
            | Self::HeartbeatSent { shard_id, .. }
            | Self::HeartbeatAck { shard_id, .. }
            | Self::HeartbeatTimeout { shard_id, .. }
            | Self::ShardReady { shard_id }
            | Self::ShardDisconnect { shard_id, .. }
            | Self::ShardReconnect { shard_id }
            | Self::Dispatch { shard_id, .. } => Some(*shard_id),
        }
    }

    /// Short category name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connecting { .. } => "connecting",
            Self::Connected { .. } => "connected",
            Self::Ready { .. } => "ready",
            Self::Reconnecting { .. } => "reconnecting",
            Self::SessionStart { .. } => "session_start",
            Self::SessionResumed { .. } => "session_resumed",
            Self::SessionEnd { .. } => "session_end",
            Self::SessionInvalid { .. } => "session_invalid",
            Self::Close { .. } => "close",
            Self::HeartbeatSent { .. } => "heartbeat_sent",
            Self::HeartbeatAck { .. } => "heartbeat_ack",
            Self::HeartbeatTimeout { .. } => "heartbeat_timeout",
            Self::ShardReady { .. } => "shard_ready",
            Self::ShardDisconnect { .. } => "shard_disconnect",
            Self::ShardReconnect { .. } => "shard_reconnect",
            Self::Dispatch { .. } => "dispatch",
            Self::Debug { .. } => "debug",
            Self::Warn { .. } => "warn",
            Self::Error { .. } => "error",
        }
    }

    pub(crate) fn debug(shard_id: u32, message: impl Into<String>) -> Self {
        Self::Debug {
            shard_id: Some(shard_id),
            message: message.into(),
        }
    }

    pub(crate) fn warn(shard_id: u32, message: impl Into<String>) -> Self {
        Self::Warn {
            shard_id: Some(shard_id),
            message: message.into(),
        }
    }

    pub(crate) fn error(shard_id: u32, message: impl Into<String>) -> Self {
        Self::Error {
            shard_id: Some(shard_id),
            message: message.into(),
        }
    }
}

impl fmt::Display for GatewayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dispatch { event, sequence, .. } => match sequence {
                Some(s) => write!(f, "dispatch {event} (s={s})"),
                None => write!(f, "dispatch {event}"),
            },
            Self::Debug { message, .. } | Self::Warn { message, .. } | Self::Error { message, .. } => {
                write!(f, "{}: {message}", self.name())
            }
            other => f.write_str(other.name()),
        }
    }
}
