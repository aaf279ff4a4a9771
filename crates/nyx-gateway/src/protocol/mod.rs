//! Gateway protocol definitions
//!
//! Op codes, the payload envelope, handshake payloads, intents and close codes.

mod close_codes;
mod intents;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{CloseAction, CloseCode, CLOSE_GOING_AWAY, CLOSE_NORMAL, CLOSE_RESUMABLE};
pub use intents::GatewayIntents;
pub use messages::GatewayPayload;
pub use opcodes::OpCode;
pub use payloads::{
    HelloPayload, IdentifyPayload, IdentifyProperties, ReadyPayload, RequestGuildMembers,
    ResumePayload, UpdatePresence, UpdateVoiceState,
};
pub(crate) use payloads::snowflake;

/// Dispatch sent after a successful Identify
pub const EVENT_READY: &str = "READY";

/// Dispatch sent after a successful Resume
pub const EVENT_RESUMED: &str = "RESUMED";
