//! Liveness probe.

use axum::http::StatusCode;

/// Returns 200 while the server is running.
pub async fn health_handler() -> StatusCode {
    StatusCode::OK
}
