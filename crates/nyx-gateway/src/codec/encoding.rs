//! Payload encoding
//!
//! Converts [`GatewayPayload`]s to and from wire bytes. The strategy is picked
//! once per connection; the codec itself holds no other state.

use crate::protocol::GatewayPayload;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

/// Largest frame the gateway accepts from clients
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 4096;

/// Wire encoding strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// Textual JSON, sent as text frames
    #[default]
    Json,
    /// Compact MessagePack, sent as binary frames
    MsgPack,
}

impl Encoding {
    /// Value of the `encoding` query parameter
    #[must_use]
    pub const fn query_value(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::MsgPack => "msgpack",
        }
    }

    /// Whether frames should be sent as binary WebSocket messages
    #[must_use]
    pub const fn is_binary(self) -> bool {
        matches!(self, Self::MsgPack)
    }
}

impl FromStr for Encoding {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "msgpack" | "messagepack" => Ok(Self::MsgPack),
            other => Err(CodecError::UnknownEncoding(other.to_string())),
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.query_value())
    }
}

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// Encoded frame is above the size ceiling
    #[error("Payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    /// Binary maps must be keyed by strings
    #[error("Binary encoding requires string map keys: {0}")]
    InvalidKey(String),

    /// Serialization failed
    #[error("Failed to encode payload: {0}")]
    Encode(String),

    /// Inbound bytes could not be parsed
    #[error("Failed to decode {encoding} payload")]
    Decode {
        encoding: Encoding,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Unsupported encoding name
    #[error("Unknown encoding: {0}")]
    UnknownEncoding(String),
}

/// Encodes and decodes gateway payloads with one strategy
#[derive(Debug, Clone, Copy)]
pub struct EncodingCodec {
    encoding: Encoding,
    max_payload_size: usize,
}

impl EncodingCodec {
    /// Create a codec with the given strategy and size ceiling
    #[must_use]
    pub fn new(encoding: Encoding, max_payload_size: usize) -> Self {
        Self {
            encoding,
            max_payload_size,
        }
    }

    /// The selected strategy
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// The size ceiling in bytes
    #[must_use]
    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Serialize a payload, enforcing the size ceiling
    pub fn encode(&self, payload: &GatewayPayload) -> Result<Vec<u8>, CodecError> {
        let bytes = match self.encoding {
            Encoding::Json => {
                serde_json::to_vec(payload).map_err(|e| CodecError::Encode(e.to_string()))?
            }
            Encoding::MsgPack => {
                rmp_serde::to_vec_named(payload).map_err(|e| CodecError::Encode(e.to_string()))?
            }
        };

        if bytes.len() > self.max_payload_size {
            return Err(CodecError::PayloadTooLarge {
                size: bytes.len(),
                max: self.max_payload_size,
            });
        }

        Ok(bytes)
    }

    /// Parse a payload from wire bytes
    pub fn decode(&self, bytes: &[u8]) -> Result<GatewayPayload, CodecError> {
        match self.encoding {
            Encoding::Json => serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
                encoding: self.encoding,
                source: Box::new(e),
            }),
            Encoding::MsgPack => rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode {
                encoding: self.encoding,
                source: Box::new(e),
            }),
        }
    }

    /// Convert application data into envelope data under this strategy's rules
    ///
    /// JSON stringifies integer map keys. The binary strategy packs the data
    /// first and rejects any map whose keys did not pack as strings.
    pub fn to_data<T: Serialize + ?Sized>(&self, data: &T) -> Result<Value, CodecError> {
        match self.encoding {
            Encoding::Json => serde_json::to_value(data).map_err(|e| CodecError::Encode(e.to_string())),
            Encoding::MsgPack => {
                let packed =
                    rmp_serde::to_vec_named(data).map_err(|e| CodecError::Encode(e.to_string()))?;
                rmp_serde::from_slice::<Value>(&packed)
                    .map_err(|e| CodecError::InvalidKey(e.to_string()))
            }
        }
    }
}

impl Default for EncodingCodec {
    fn default() -> Self {
        Self::new(Encoding::Json, DEFAULT_MAX_PAYLOAD_SIZE)
    }
}
