//! Shard planning and identify coordination

mod coordinator;
mod identify_queue;

pub use coordinator::{
    bucket_of, check_session_start_limit, shard_for_guild, ShardCoordinator, ShardDescriptor,
    ShardError,
};
pub use identify_queue::{IdentifyQueue, DEFAULT_IDENTIFY_DELAY};
