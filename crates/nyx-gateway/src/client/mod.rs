//! Public gateway client

mod gateway;
mod options;

pub use gateway::Gateway;
pub use options::{
    GatewayOptions, ShardMode, DEFAULT_API_VERSION, DEFAULT_COMMANDS_PER_MINUTE,
    DEFAULT_LARGE_THRESHOLD, DEFAULT_LATENCY_CEILING,
};
