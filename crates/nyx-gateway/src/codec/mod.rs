//! Wire codecs
//!
//! Inbound bytes pass through the [`Decompressor`] (when transport
//! compression is negotiated) and then the [`EncodingCodec`].

mod compression;
mod encoding;

pub use compression::{CompressionError, CompressionType, Decompressor, ZLIB_SUFFIX};
pub use encoding::{CodecError, Encoding, EncodingCodec, DEFAULT_MAX_PAYLOAD_SIZE};
