//! Reconnect backoff
//!
//! A fixed schedule indexed by attempt number. Attempts past the end of the
//! schedule reuse its last delay.

use std::time::Duration;

/// Default delays between reconnect attempts
pub const DEFAULT_RECONNECT_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(10),
];

/// Default reconnect attempts before a shard gives up
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Reconnect schedule and attempt ceiling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delays: Vec<Duration>,
    max_attempts: u32,
}

impl ReconnectPolicy {
    /// Create a policy; an empty schedule means no delay
    #[must_use]
    pub fn new(delays: Vec<Duration>, max_attempts: u32) -> Self {
        Self {
            delays,
            max_attempts,
        }
    }

    /// Delay before the reconnect following `attempt` earlier ones
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = (attempt as usize).min(self.delays.len().saturating_sub(1));
        self.delays.get(index).copied().unwrap_or_default()
    }

    /// Whether another attempt is allowed after `attempts` consecutive ones
    #[must_use]
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAYS.to_vec(), DEFAULT_MAX_RECONNECT_ATTEMPTS)
    }
}
