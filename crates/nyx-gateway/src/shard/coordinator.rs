//! Shard planning
//!
//! Decides how many shards to run, which identify bucket each belongs to,
//! and which shard owns a given guild.

use crate::rest::SessionStartLimit;
use std::time::Duration;
use thiserror::Error;

/// Sharding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShardError {
    #[error("Shard count cannot change once shards have spawned")]
    AlreadySpawned,

    #[error("max_concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("Shard count must be at least 1")]
    InvalidShardCount,

    #[error("Shard {id} is out of range for {total} shards")]
    InvalidShardId { id: u32, total: u32 },

    #[error(
        "Session start limit reached: {remaining} identifies left, {required} needed (resets in {reset_after:?})"
    )]
    SessionStartLimit {
        remaining: u32,
        required: u32,
        reset_after: Duration,
    },
}

/// Identify bucket of a shard
#[must_use]
pub fn bucket_of(shard_id: u32, max_concurrency: u32) -> u32 {
    shard_id % max_concurrency.max(1)
}

/// Shard that receives events for a guild
#[must_use]
pub fn shard_for_guild(guild_id: u64, total: u32) -> u32 {
    ((guild_id >> 22) % u64::from(total.max(1))) as u32
}

/// One planned shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardDescriptor {
    /// Shard index
    pub id: u32,
    /// Shard count for this run
    pub total: u32,
    /// Identify bucket
    pub bucket: u32,
    /// Expected guilds on this shard
    pub guild_estimate: u64,
}

impl ShardDescriptor {
    /// `[id, total]` as sent in Identify
    #[must_use]
    pub fn identify_pair(&self) -> [u32; 2] {
        [self.id, self.total]
    }
}

/// Plans shard layout for one run
#[derive(Debug, Clone, Default)]
pub struct ShardCoordinator {
    guilds_per_shard: Option<u64>,
    total: u32,
    spawned: bool,
}

impl ShardCoordinator {
    /// Create a coordinator; `guilds_per_shard` enables load-based recalculation
    #[must_use]
    pub fn new(guilds_per_shard: Option<u64>) -> Self {
        Self {
            guilds_per_shard: guilds_per_shard.filter(|n| *n > 0),
            total: 0,
            spawned: false,
        }
    }

    /// Current shard count
    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Whether shards have been handed out
    #[must_use]
    pub fn is_spawned(&self) -> bool {
        self.spawned
    }

    /// Raise the shard count to fit `guild_count`
    ///
    /// The count never drops below its current value.
    pub fn recalculate(&mut self, guild_count: u64) -> Result<u32, ShardError> {
        if self.spawned {
            return Err(ShardError::AlreadySpawned);
        }

        if let Some(per_shard) = self.guilds_per_shard {
            let needed = u32::try_from(guild_count.div_ceil(per_shard)).unwrap_or(u32::MAX);
            if needed > self.total {
                tracing::info!(
                    guild_count,
                    guilds_per_shard = per_shard,
                    previous = self.total,
                    shards = needed,
                    "Shard count recalculated"
                );
                self.total = needed;
            }
        }

        Ok(self.total)
    }

    /// Plan every shard from `0..total`
    pub fn spawn(
        &mut self,
        total_guild_count: u64,
        max_concurrency: u32,
        recommended_shard_count: u32,
    ) -> Result<Vec<ShardDescriptor>, ShardError> {
        if self.spawned {
            return Err(ShardError::AlreadySpawned);
        }
        if max_concurrency == 0 {
            return Err(ShardError::InvalidConcurrency);
        }
        if recommended_shard_count == 0 {
            return Err(ShardError::InvalidShardCount);
        }

        self.total = self.total.max(recommended_shard_count);
        let total = self.recalculate(total_guild_count)?;
        let ids: Vec<u32> = (0..total).collect();
        self.finish(&ids, total, max_concurrency, total_guild_count)
    }

    /// Plan an explicit subset of shards out of `total`
    pub fn spawn_fixed(
        &mut self,
        ids: &[u32],
        total: u32,
        max_concurrency: u32,
        total_guild_count: u64,
    ) -> Result<Vec<ShardDescriptor>, ShardError> {
        if self.spawned {
            return Err(ShardError::AlreadySpawned);
        }
        if max_concurrency == 0 {
            return Err(ShardError::InvalidConcurrency);
        }
        if total == 0 || ids.is_empty() {
            return Err(ShardError::InvalidShardCount);
        }
        if let Some(&id) = ids.iter().find(|&&id| id >= total) {
            return Err(ShardError::InvalidShardId { id, total });
        }

        self.total = total;
        self.finish(ids, total, max_concurrency, total_guild_count)
    }

    fn finish(
        &mut self,
        ids: &[u32],
        total: u32,
        max_concurrency: u32,
        total_guild_count: u64,
    ) -> Result<Vec<ShardDescriptor>, ShardError> {
        let guild_estimate = total_guild_count.div_ceil(u64::from(total));
        let shards = ids
            .iter()
            .map(|&id| ShardDescriptor {
                id,
                total,
                bucket: bucket_of(id, max_concurrency),
                guild_estimate,
            })
            .collect();

        self.spawned = true;
        tracing::info!(total, spawning = ids.len(), max_concurrency, "Shards planned");
        Ok(shards)
    }
}

/// Fail when the remaining identify budget cannot start `required` shards
pub fn check_session_start_limit(
    limit: &SessionStartLimit,
    required: usize,
) -> Result<(), ShardError> {
    let required = u32::try_from(required).unwrap_or(u32::MAX);
    if limit.remaining < required {
        return Err(ShardError::SessionStartLimit {
            remaining: limit.remaining,
            required,
            reset_after: Duration::from_millis(limit.reset_after),
        });
    }
    Ok(())
}
