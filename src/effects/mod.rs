//! Effects-as-data for the chat platform API.
//!
//! The moderation core decides what should happen and expresses it as
//! [`ApiEffect`] values; an [`ApiInterpreter`] executes them. This keeps the
//! decision logic pure and testable against a recording interpreter, and
//! gives the logs an exact record of every intended operation.

pub mod api;
pub mod interpreter;
pub mod telegram;

pub use api::{ApiEffect, ApiResponse, Button};
pub use interpreter::ApiInterpreter;
pub use telegram::{TelegramError, TelegramInterpreter};
