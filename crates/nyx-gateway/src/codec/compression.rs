//! Transport decompression
//!
//! The gateway compresses the whole socket as one stream, so a single
//! decompressor must live exactly as long as one socket and see every
//! inbound chunk in order.

use flate2::write::ZlibDecoder;
use std::io::Write;
use std::str::FromStr;
use thiserror::Error;

/// Sync-flush marker that terminates every complete zlib-stream message
pub const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Transport compression strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    /// One zlib context for the socket, messages end with [`ZLIB_SUFFIX`]
    ZlibStream,
    /// One zstd streaming context for the socket
    ZstdStream,
}

impl CompressionType {
    /// Value of the `compress` query parameter
    #[must_use]
    pub const fn query_value(self) -> &'static str {
        match self {
            Self::ZlibStream => "zlib-stream",
            Self::ZstdStream => "zstd-stream",
        }
    }
}

impl FromStr for CompressionType {
    type Err = CompressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zlib-stream" | "zlib" => Ok(Self::ZlibStream),
            "zstd-stream" | "zstd" => Ok(Self::ZstdStream),
            other => Err(CompressionError::UnknownType(other.to_string())),
        }
    }
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.query_value())
    }
}

/// Decompression errors
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("Decompressor used before initialize()")]
    NotInitialized,

    #[error("Corrupt {kind} stream")]
    Corrupt {
        kind: CompressionType,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown compression type: {0}")]
    UnknownType(String),
}

enum Inflater {
    Zlib {
        decoder: ZlibDecoder<Vec<u8>>,
        pending: Vec<u8>,
    },
    Zstd(zstd::stream::write::Decoder<'static, Vec<u8>>),
}

/// Stateful streaming decompressor for one socket
pub struct Decompressor {
    kind: CompressionType,
    inflater: Option<Inflater>,
}

impl Decompressor {
    /// Create an uninitialized decompressor
    #[must_use]
    pub fn new(kind: CompressionType) -> Self {
        Self {
            kind,
            inflater: None,
        }
    }

    /// The configured strategy
    #[must_use]
    pub fn kind(&self) -> CompressionType {
        self.kind
    }

    /// Check whether stream state is allocated
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inflater.is_some()
    }

    /// Allocate the stream state. Calling again keeps the existing stream.
    pub fn initialize(&mut self) -> Result<(), CompressionError> {
        if self.inflater.is_some() {
            return Ok(());
        }

        let inflater = match self.kind {
            CompressionType::ZlibStream => Inflater::Zlib {
                decoder: ZlibDecoder::new(Vec::new()),
                pending: Vec::new(),
            },
            CompressionType::ZstdStream => Inflater::Zstd(
                zstd::stream::write::Decoder::new(Vec::new()).map_err(|source| {
                    CompressionError::Corrupt {
                        kind: self.kind,
                        source,
                    }
                })?,
            ),
        };
        self.inflater = Some(inflater);
        Ok(())
    }

    /// Feed one inbound chunk
    ///
    /// Returns `Ok(None)` while a zlib message is still incomplete or when
    /// the chunk produced no output.
    pub fn decompress(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, CompressionError> {
        let kind = self.kind;
        let corrupt = |source| CompressionError::Corrupt { kind, source };

        let output = match self.inflater.as_mut() {
            None => return Err(CompressionError::NotInitialized),
            Some(Inflater::Zlib { decoder, pending }) => {
                pending.extend_from_slice(chunk);
                if !pending.ends_with(&ZLIB_SUFFIX) {
                    return Ok(None);
                }

                let message = std::mem::take(pending);
                decoder.write_all(&message).map_err(corrupt)?;
                decoder.flush().map_err(corrupt)?;
                std::mem::take(decoder.get_mut())
            }
            Some(Inflater::Zstd(decoder)) => {
                decoder.write_all(chunk).map_err(corrupt)?;
                decoder.flush().map_err(corrupt)?;
                std::mem::take(decoder.get_mut())
            }
        };

        if output.is_empty() {
            Ok(None)
        } else {
            Ok(Some(output))
        }
    }

    /// Release the stream state. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        self.inflater = None;
    }
}

impl std::fmt::Debug for Decompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decompressor")
            .field("kind", &self.kind)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
