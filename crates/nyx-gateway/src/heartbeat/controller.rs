//! Heartbeat controller
//!
//! Tracks the heartbeat schedule and acknowledgements for one socket. The
//! controller never touches the socket itself: the shard runner asks it for
//! the next deadline, calls [`HeartbeatController::tick`] when that deadline
//! passes, and performs the actual send.

use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Smallest interval accepted from a Hello
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 1000;

/// Consecutive unacknowledged beats before the socket counts as zombied
pub const DEFAULT_MAX_MISSED: u32 = 2;

/// Heartbeat errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeartbeatError {
    #[error("Heartbeat interval {0}ms is below the {MIN_HEARTBEAT_INTERVAL_MS}ms floor")]
    InvalidInterval(u64),
}

/// Observable controller events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Controller started; first beat after `first_beat_in`
    Started {
        interval: Duration,
        first_beat_in: Duration,
    },
    /// A heartbeat was written
    Sent,
    /// The server acknowledged the last heartbeat
    Acknowledged { latency: Duration },
    /// A scheduled beat found the previous one unacknowledged
    Missed { missed: u32 },
    /// Threshold reached; the controller stopped
    Zombied { missed: u32 },
}

/// Result of a scheduler tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to do yet, or the controller is idle
    Idle,
    /// The caller must send a heartbeat now
    Beat,
    /// Too many beats went unacknowledged; the caller must reconnect
    Zombied,
}

#[derive(Debug)]
struct Schedule {
    interval: Duration,
    next_beat: Instant,
    last_sent: Option<Instant>,
    acknowledged: bool,
}

/// Heartbeat state for one socket
#[derive(Debug)]
pub struct HeartbeatController {
    max_missed: u32,
    schedule: Option<Schedule>,
    missed: u32,
    latency: Option<Duration>,
    events: mpsc::UnboundedSender<HeartbeatEvent>,
}

impl HeartbeatController {
    /// Create an idle controller and the receiving end of its event channel
    #[must_use]
    pub fn new(max_missed: u32) -> (Self, mpsc::UnboundedReceiver<HeartbeatEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let controller = Self {
            max_missed: max_missed.max(1),
            schedule: None,
            missed: 0,
            latency: None,
            events,
        };
        (controller, rx)
    }

    /// Start beating with a random first-beat jitter in `[0, interval)`
    pub fn start(&mut self, interval_ms: u64) -> Result<(), HeartbeatError> {
        Self::validate_interval(interval_ms)?;
        let jitter_ms = rand::thread_rng().gen_range(0..interval_ms);
        self.start_at(Instant::now(), interval_ms, jitter_ms)
    }

    /// Start with an explicit first-beat offset
    pub(crate) fn start_at(
        &mut self,
        now: Instant,
        interval_ms: u64,
        jitter_ms: u64,
    ) -> Result<(), HeartbeatError> {
        Self::validate_interval(interval_ms)?;

        let interval = Duration::from_millis(interval_ms);
        let first_beat_in = Duration::from_millis(jitter_ms.min(interval_ms - 1));

        self.schedule = Some(Schedule {
            interval,
            next_beat: now + first_beat_in,
            last_sent: None,
            acknowledged: true,
        });
        self.missed = 0;

        tracing::debug!(
            interval_ms,
            first_beat_ms = first_beat_in.as_millis() as u64,
            "Heartbeat started"
        );
        self.emit(HeartbeatEvent::Started {
            interval,
            first_beat_in,
        });
        Ok(())
    }

    fn validate_interval(interval_ms: u64) -> Result<(), HeartbeatError> {
        if interval_ms < MIN_HEARTBEAT_INTERVAL_MS {
            return Err(HeartbeatError::InvalidInterval(interval_ms));
        }
        Ok(())
    }

    /// When the next beat is due, `None` while idle
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.schedule.as_ref().map(|s| s.next_beat)
    }

    /// Advance the schedule if a beat is due at `now`
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let Some(schedule) = self.schedule.as_mut() else {
            return TickOutcome::Idle;
        };
        if now < schedule.next_beat {
            return TickOutcome::Idle;
        }

        schedule.next_beat += schedule.interval;

        if schedule.last_sent.is_some() && !schedule.acknowledged {
            self.missed += 1;
            tracing::warn!(missed = self.missed, max = self.max_missed, "Heartbeat not acknowledged");
            self.emit(HeartbeatEvent::Missed { missed: self.missed });

            if self.missed >= self.max_missed {
                self.schedule = None;
                self.emit(HeartbeatEvent::Zombied { missed: self.missed });
                return TickOutcome::Zombied;
            }
        }

        TickOutcome::Beat
    }

    /// Record that a heartbeat was just written to the socket
    ///
    /// Used for both scheduled beats and server-requested ones. The
    /// schedule itself is not shifted.
    pub fn send_heartbeat(&mut self, now: Instant) {
        if let Some(schedule) = self.schedule.as_mut() {
            schedule.last_sent = Some(now);
            schedule.acknowledged = false;
            self.emit(HeartbeatEvent::Sent);
        }
    }

    /// Record an acknowledgement, returning the measured latency
    pub fn acknowledge(&mut self, now: Instant) -> Option<Duration> {
        let schedule = self.schedule.as_mut()?;
        let sent = schedule.last_sent?;

        let latency = now.saturating_duration_since(sent);
        schedule.acknowledged = true;
        self.missed = 0;
        self.latency = Some(latency);

        tracing::trace!(latency_ms = latency.as_millis() as u64, "Heartbeat acknowledged");
        self.emit(HeartbeatEvent::Acknowledged { latency });
        Some(latency)
    }

    /// Stop the schedule. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if self.schedule.take().is_some() {
            tracing::trace!("Heartbeat stopped");
        }
        self.missed = 0;
    }

    /// Whether a schedule is active
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.schedule.is_some()
    }

    /// The active interval
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        self.schedule.as_ref().map(|s| s.interval)
    }

    /// Latest measured round trip
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// Consecutive unacknowledged beats
    #[must_use]
    pub fn missed(&self) -> u32 {
        self.missed
    }

    /// Threshold at which the socket is declared zombied
    #[must_use]
    pub fn max_missed(&self) -> u32 {
        self.max_missed
    }

    fn emit(&self, event: HeartbeatEvent) {
        let _ = self.events.send(event);
    }
}
