//! Heartbeat scheduling and liveness tracking

mod controller;

pub use controller::{
    HeartbeatController, HeartbeatError, HeartbeatEvent, TickOutcome, DEFAULT_MAX_MISSED,
    MIN_HEARTBEAT_INTERVAL_MS,
};
