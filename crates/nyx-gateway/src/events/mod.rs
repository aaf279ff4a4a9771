//! Gateway events
//!
//! The typed event stream exposed to applications.

mod gateway_event;

pub use gateway_event::GatewayEvent;
