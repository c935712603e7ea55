//! Core domain types for the moderation processor.
//!
//! This module contains the fundamental types used throughout the application,
//! designed to encode invariants via the type system.

pub mod ids;
pub mod member;

// Re-export commonly used types at the module level
pub use ids::{CallbackId, ChatId, MessageId, UpdateId, UserId};
pub use member::{MemberStatus, PermissionSet};
