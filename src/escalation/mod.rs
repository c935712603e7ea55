//! Subscription-violation escalation.
//!
//! The warn → count → mute lifecycle for senders not subscribed to the
//! target channel, with a durable, monotonic mute ladder.

pub mod machine;

pub use machine::{EscalationMachine, MessageOutcome};
