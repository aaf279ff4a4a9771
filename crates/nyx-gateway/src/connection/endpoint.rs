//! Connect URL construction

use crate::codec::{CompressionType, Encoding};
use crate::error::GatewayError;
use url::Url;

/// Append the gateway query to a base URL
///
/// `v` and `encoding` are always present; `compress` only when transport
/// compression is configured. Any query already on `base` is replaced.
pub fn gateway_url(
    base: &str,
    version: u8,
    encoding: Encoding,
    compression: Option<CompressionType>,
) -> Result<Url, GatewayError> {
    let mut url = Url::parse(base).map_err(|e| GatewayError::InvalidUrl(format!("{base}: {e}")))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(GatewayError::InvalidUrl(format!("{base}: expected a ws:// or wss:// URL")));
    }

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.append_pair("v", &version.to_string());
        query.append_pair("encoding", encoding.query_value());
        if let Some(compression) = compression {
            query.append_pair("compress", compression.query_value());
        }
    }

    Ok(url)
}
