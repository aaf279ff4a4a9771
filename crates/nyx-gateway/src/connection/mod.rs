//! Shard connections
//!
//! Each shard runs one task that owns its socket and publishes a
//! [`ShardStatus`] snapshot on every state change.

mod backoff;
mod endpoint;
pub(crate) mod runner;
mod state;

pub use backoff::{ReconnectPolicy, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAYS};
pub use endpoint::gateway_url;
pub use state::{ConnectionState, ShardStatus};
