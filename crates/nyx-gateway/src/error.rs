//! Gateway error types

use crate::codec::{CodecError, CompressionError};
use crate::heartbeat::HeartbeatError;
use crate::protocol::OpCode;
use crate::rest::MetadataError;
use crate::shard::ShardError;
use thiserror::Error;

/// Errors returned by the gateway client
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Options failed validation
    #[error("Invalid gateway options: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// Payload encoding or decoding failed
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Transport decompression failed
    #[error(transparent)]
    Compression(#[from] CompressionError),

    /// The server sent an unusable heartbeat interval
    #[error(transparent)]
    Heartbeat(#[from] HeartbeatError),

    /// Shard planning failed
    #[error(transparent)]
    Shard(#[from] ShardError),

    /// Connection metadata lookup failed
    #[error("Metadata lookup failed: {0}")]
    Metadata(#[from] MetadataError),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// The shard's socket is not open
    #[error("Shard {0} is not connected")]
    NotConnected(u32),

    /// No shard with this ID is managed by the client
    #[error("Unknown shard {0}")]
    UnknownShard(u32),

    /// Clients may not send this op code
    #[error("Op code {0} cannot be sent by clients")]
    NotSendable(OpCode),

    /// A shard exhausted its reconnect attempts
    #[error("Shard {shard_id} gave up after {attempts} reconnect attempts")]
    MaxReconnectAttempts { shard_id: u32, attempts: u32 },

    /// The server closed with a code that must not be retried
    #[error("Shard {shard_id} closed with fatal code {code}: {reason}")]
    FatalClose {
        shard_id: u32,
        code: u16,
        reason: String,
    },

    /// The gateway URL could not be built
    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),

    /// `connect` was called twice
    #[error("Gateway is already connected")]
    AlreadyConnected,

    /// The client was destroyed
    #[error("Gateway has been destroyed")]
    Destroyed,

    /// The server broke the protocol
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl GatewayError {
    /// Whether the shard runner may recover from this error by reconnecting
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WebSocket(_) | Self::Compression(_) | Self::Codec(CodecError::Decode { .. })
        )
    }
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;
