//! Effect interpreter trait.
//!
//! The trait-based design enables:
//! - Mock interpreters for testing (record effects, script responses)
//! - Logging/tracing interpreters
//! - The real HTTP-backed interpreter in [`super::telegram`]

use std::future::Future;

use super::api::{ApiEffect, ApiResponse};

/// Interprets Bot API effects.
///
/// # Example (mock for testing)
///
/// ```ignore
/// struct RecordingInterpreter {
///     effects: Mutex<Vec<ApiEffect>>,
/// }
///
/// impl ApiInterpreter for RecordingInterpreter {
///     type Error = std::convert::Infallible;
///
///     async fn interpret(&self, effect: ApiEffect) -> Result<ApiResponse, Self::Error> {
///         self.effects.lock().unwrap().push(effect);
///         Ok(ApiResponse::Ok)
///     }
/// }
/// ```
pub trait ApiInterpreter: Send + Sync {
    /// The error type returned by this interpreter.
    type Error: std::fmt::Display + Send;

    /// Execute an effect and return its response.
    fn interpret(
        &self,
        effect: ApiEffect,
    ) -> impl Future<Output = Result<ApiResponse, Self::Error>> + Send;
}

/// A shared interpreter interprets through the shared reference.
impl<T: ApiInterpreter> ApiInterpreter for std::sync::Arc<T> {
    type Error = T::Error;

    fn interpret(
        &self,
        effect: ApiEffect,
    ) -> impl Future<Output = Result<ApiResponse, Self::Error>> + Send {
        T::interpret(self, effect)
    }
}
