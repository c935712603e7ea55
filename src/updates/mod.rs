//! Inbound update model and parsing.
//!
//! Webhook deliveries arrive as one JSON update object each. The parser turns
//! the raw payload into a typed [`Update`]; unknown update kinds are ignored
//! rather than treated as errors, since the platform adds kinds over time.

pub mod events;
pub mod parser;

pub use events::{
    Actor, ButtonPayload, ButtonPress, JoinRequest, MemberStatusChange, MessageEvent, Update,
};
pub use parser::{ParseError, parse_update};
