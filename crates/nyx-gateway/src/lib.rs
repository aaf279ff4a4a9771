//! # nyx-gateway
//!
//! Sharded Gateway client: one WebSocket session per shard, kept alive with
//! heartbeats and resumed or re-identified after interruptions.
//!
//! ```no_run
//! use nyx_gateway::{Gateway, GatewayIntents, GatewayOptions, HttpMetadataProvider};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = HttpMetadataProvider::new("https://discord.com/api/v10", "a.b.c")?;
//! let options = GatewayOptions::new("a.b.c", GatewayIntents::GUILDS);
//! let (gateway, mut events) = Gateway::new(options, Arc::new(provider))?;
//!
//! gateway.connect().await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod connection;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod protocol;
pub mod rest;
pub mod session;
pub mod shard;

pub use client::{Gateway, GatewayOptions, ShardMode};
pub use codec::{CompressionType, Encoding};
pub use connection::{ConnectionState, ReconnectPolicy, ShardStatus};
pub use error::{GatewayError, GatewayResult};
pub use events::GatewayEvent;
pub use protocol::{GatewayIntents, GatewayPayload, OpCode};
pub use rest::{HttpMetadataProvider, MetadataProvider, StaticMetadataProvider};
