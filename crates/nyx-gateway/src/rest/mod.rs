//! REST collaborators
//!
//! Only the two lookups the gateway needs before connecting.

mod http;
mod metadata;

pub use http::HttpMetadataProvider;
pub use metadata::{
    ConnectionMetadata, MetadataError, MetadataProvider, SessionStartLimit, StaticMetadataProvider,
};
