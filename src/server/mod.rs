//! HTTP surface for the moderation processor.
//!
//! # Endpoints
//!
//! - `POST /webhook` - one JSON update per delivery. Acknowledged with 200
//!   regardless of internal outcome; only a failed secret-token check gets
//!   401 so the platform stops delivering to a misconfigured endpoint.
//! - `GET /healthz` - liveness probe.

use std::sync::Arc;

pub mod health;
pub mod webhook;

pub use health::health_handler;
pub use webhook::webhook_handler;

use crate::dispatch::Dispatcher;
use crate::effects::ApiInterpreter;

/// Shared application state, passed to handlers via axum's `State`.
pub struct AppState<I: ApiInterpreter> {
    inner: Arc<AppStateInner<I>>,
}

impl<I: ApiInterpreter> Clone for AppState<I> {
    fn clone(&self) -> Self {
        AppState {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct AppStateInner<I: ApiInterpreter> {
    dispatcher: Dispatcher<I>,

    /// Expected value of the platform's secret-token header, if configured.
    webhook_secret: Option<String>,
}

impl<I: ApiInterpreter> AppState<I> {
    pub fn new(dispatcher: Dispatcher<I>, webhook_secret: Option<String>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                dispatcher,
                webhook_secret,
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<I> {
        &self.inner.dispatcher
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.inner.webhook_secret.as_deref()
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<I: ApiInterpreter + 'static>(app_state: AppState<I>) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler::<I>))
        .route("/healthz", get(health_handler))
        .with_state(app_state)
}
