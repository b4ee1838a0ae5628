//! HTTP endpoint handlers.
//!
//! The webhook endpoint accepts every method so that non-POST requests get
//! the JSON 405 body instead of axum's empty default. All decisions are made
//! by the [`Dispatcher`]; this layer only moves bytes in and out of HTTP.

use std::sync::Arc;

use axum::{
    body,
    extract::{Request, State},
    Json,
};
use serde::Serialize;

use crate::event::HandlerResult;
use crate::web::dispatcher::{DispatchError, Dispatcher};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// GitHub Webhook
// =============================================================================

/// GitHub webhook endpoint.
///
/// This endpoint:
/// 1. Checks method and required headers before touching the body
/// 2. Reads the raw body exactly once
/// 3. Verifies the signature, parses JSON and awaits the event handler
/// 4. Returns the handler's result as JSON
pub async fn github_webhook(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<HandlerResult>, DispatchError> {
    let dispatcher = &state.dispatcher;
    let (parts, incoming) = request.into_parts();

    let delivery = dispatcher.preflight(&parts.method, &parts.headers)?;

    let raw_body = match body::to_bytes(incoming, dispatcher.max_body_bytes()).await {
        Ok(bytes) => bytes,
        Err(e) => return Err(dispatcher.body_read_error(e, &delivery)),
    };

    let result = dispatcher.deliver(delivery, raw_body).await?;

    Ok(Json(result))
}
