//! Connection metadata
//!
//! The gateway needs three facts before it can open a socket: where to
//! connect, how many shards the server recommends, and how many shards may
//! identify at once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metadata lookup errors
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unauthorized: the token was rejected")]
    Unauthorized,

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),
}

/// Identify budget reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    /// Identifies allowed per reset window
    pub total: u32,
    /// Identifies left in the current window
    pub remaining: u32,
    /// Milliseconds until the window resets
    pub reset_after: u64,
    /// Shards allowed to identify concurrently
    pub max_concurrency: u32,
}

impl Default for SessionStartLimit {
    fn default() -> Self {
        Self {
            total: 1000,
            remaining: 1000,
            reset_after: 0,
            max_concurrency: 1,
        }
    }
}

/// Response of `GET /gateway/bot`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMetadata {
    /// Base WebSocket URL
    pub url: String,
    /// Recommended shard count
    pub shards: u32,
    /// Identify budget
    pub session_start_limit: SessionStartLimit,
}

/// Source of connection metadata
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Endpoint URL, recommended shard count and identify limits
    async fn connection_metadata(&self) -> Result<ConnectionMetadata, MetadataError>;

    /// Number of guilds the application is in, used to size shards
    async fn resource_count(&self) -> Result<u64, MetadataError>;
}

/// Provider returning fixed values
#[derive(Debug, Clone)]
pub struct StaticMetadataProvider {
    metadata: ConnectionMetadata,
    resource_count: u64,
}

impl StaticMetadataProvider {
    /// Serve `url` with the given shard count and concurrency
    #[must_use]
    pub fn new(url: impl Into<String>, shards: u32, max_concurrency: u32) -> Self {
        Self {
            metadata: ConnectionMetadata {
                url: url.into(),
                shards,
                session_start_limit: SessionStartLimit {
                    max_concurrency,
                    ..SessionStartLimit::default()
                },
            },
            resource_count: 0,
        }
    }

    /// Override the reported guild count
    #[must_use]
    pub fn with_resource_count(mut self, count: u64) -> Self {
        self.resource_count = count;
        self
    }

    /// Override the identify budget
    #[must_use]
    pub fn with_session_start_limit(mut self, limit: SessionStartLimit) -> Self {
        self.metadata.session_start_limit = limit;
        self
    }
}

#[async_trait]
impl MetadataProvider for StaticMetadataProvider {
    async fn connection_metadata(&self) -> Result<ConnectionMetadata, MetadataError> {
        Ok(self.metadata.clone())
    }

    async fn resource_count(&self) -> Result<u64, MetadataError> {
        Ok(self.resource_count)
    }
}
