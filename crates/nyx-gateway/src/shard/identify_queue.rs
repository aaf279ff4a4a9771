//! Identify rate limiting
//!
//! Shards in the same bucket identify one at a time with a fixed gap;
//! different buckets proceed concurrently. Every Identify sent by this crate
//! waits for a turn here first.

use super::bucket_of;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default gap between identifies within one bucket
pub const DEFAULT_IDENTIFY_DELAY: Duration = Duration::from_secs(5);

/// Per-bucket identify serializer shared by every shard runner
#[derive(Debug)]
pub struct IdentifyQueue {
    delay: Duration,
    buckets: Vec<Mutex<Option<Instant>>>,
}

impl IdentifyQueue {
    /// Create a queue with `max_concurrency` buckets
    #[must_use]
    pub fn new(max_concurrency: u32, delay: Duration) -> Self {
        let buckets = (0..max_concurrency.max(1)).map(|_| Mutex::new(None)).collect();
        Self { delay, buckets }
    }

    /// Number of buckets
    #[must_use]
    pub fn max_concurrency(&self) -> u32 {
        self.buckets.len() as u32
    }

    /// Minimum gap between identifies in a bucket
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Wait until `shard_id` may send Identify
    ///
    /// Waiters in a bucket are served in arrival order. The turn is recorded
    /// when this returns, so the caller should identify immediately.
    pub async fn wait_turn(&self, shard_id: u32) {
        let bucket = bucket_of(shard_id, self.max_concurrency()) as usize;
        let mut last = self.buckets[bucket].lock().await;

        if let Some(previous) = *last {
            let ready_at = previous + self.delay;
            if ready_at > Instant::now() {
                tracing::debug!(
                    shard_id,
                    bucket,
                    wait_ms = (ready_at - Instant::now()).as_millis() as u64,
                    "Waiting for identify turn"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }

        *last = Some(Instant::now());
        tracing::trace!(shard_id, bucket, "Identify turn granted");
    }
}
