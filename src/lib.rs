//! chat-warden - a moderation processor behind a chat platform's event webhook.
//!
//! This library provides the event-filtering pipeline, the join/challenge and
//! subscription-violation state machines, and the deferred-action scheduler
//! that backs message cleanup and timed unmute.

pub mod challenge;
pub mod config;
pub mod deferred;
pub mod dispatch;
pub mod effects;
pub mod escalation;
pub mod gate;
pub mod pipeline;
pub mod server;
pub mod store;
pub mod types;
pub mod updates;

#[cfg(test)]
pub mod test_utils;
