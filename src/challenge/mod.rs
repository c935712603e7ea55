//! Join challenges.
//!
//! Governs the `none → pending → {passed, expired, failed}` lifecycle for new
//! arrivals: real-join detection, temporary mute, the single-button prompt,
//! press verification, and the deferred timeout.

pub mod machine;
pub mod record;

pub use machine::{ChallengeMachine, is_real_join};
pub use record::{ChallengeRecord, ChallengeStatus};
