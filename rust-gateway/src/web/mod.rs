//! Web server module for receiving GitHub webhooks.
//!
//! This module provides the HTTP surface that:
//! - Authenticates deliveries against the shared webhook secret
//! - Classifies them by event type
//! - Awaits the configured event handler and returns its result as JSON

pub mod dispatcher;
pub mod handlers;
pub mod signature;

use axum::{
    routing::{any, get},
    Router,
};
use tower_http::trace::TraceLayer;

pub use dispatcher::{
    DeliveryHeaders, DispatchError, Dispatcher, ErrorResponse, IncomingRequest,
    DEFAULT_MAX_BODY_BYTES, DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER,
};
pub use handlers::{github_webhook, health, AppState, HealthResponse};
pub use signature::{verify_signature, Secret, SignatureError, SignatureVerifier};

/// Build the application router with the webhook mounted at `webhook_path`.
pub fn router(state: AppState, webhook_path: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(webhook_path, any(github_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
