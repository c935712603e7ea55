//! Webhook endpoint handler.
//!
//! Receives one JSON update per delivery and hands it to the dispatcher. The
//! platform redelivers on non-2xx, so every outcome acknowledges with 200:
//! malformed payloads, and deliveries failing the secret-token check, are
//! logged and dropped without ever surfacing an error to the sender. The
//! idempotency gate absorbs redeliveries anyway.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use tracing::{debug, warn};

use super::AppState;
use crate::effects::ApiInterpreter;

/// The platform's shared-secret header, set when registering the webhook.
const HEADER_SECRET_TOKEN: &str = "x-telegram-bot-api-secret-token";

/// Comparison that does not leak the matching prefix length.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Accepts one webhook delivery.
pub async fn webhook_handler<I: ApiInterpreter>(
    State(state): State<AppState<I>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(expected) = state.webhook_secret() {
        let presented = headers
            .get(HEADER_SECRET_TOKEN)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            // Dropped, not errored: a non-2xx would only invite redelivery.
            warn!("webhook secret token mismatch, payload dropped");
            return StatusCode::OK;
        }
    }

    let outcome = state.dispatcher().handle_raw(&body).await;
    debug!(?outcome, "webhook processed");
    StatusCode::OK
}
