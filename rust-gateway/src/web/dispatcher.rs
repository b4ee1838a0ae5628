//! Request validation and dispatch.
//!
//! Every delivery walks the same sequence and stops at the first failure:
//!
//! ```text
//! method → signature header → event header → body size → raw body
//!        → signature → JSON payload → EventHandler → 200 response
//! ```
//!
//! The raw body is captured once. The verifier hashes those exact bytes and
//! the JSON parser reads the same buffer afterwards.

use std::sync::Arc;

use axum::{
    body::Bytes,
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use http_body_util::LengthLimitError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::event::{EventEnvelope, EventHandler, HandlerEnv, HandlerResult};
use crate::web::signature::{SignatureError, SignatureVerifier};

/// Header carrying the `sha256=<hex>` body signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Header carrying the event type.
pub const EVENT_HEADER: &str = "x-github-event";

/// Header carrying GitHub's per-delivery GUID. Only used for logging.
pub const DELIVERY_HEADER: &str = "x-github-delivery";

/// GitHub caps webhook payloads at 25 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Response body returned for every rejected request.
const FORBIDDEN_MESSAGE: &str = "Forbidden. Not gonna happen with that signature.";

// =============================================================================
// Errors
// =============================================================================

/// Why a delivery was rejected.
///
/// Each variant maps to a fixed status code and a fixed message; internal
/// detail carried by a variant is only ever logged.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("method {0} not allowed")]
    MethodNotAllowed(Method),

    #[error("signature header is missing")]
    MissingSignature,

    #[error("event header is missing")]
    MissingEvent,

    /// `length` is `None` when the body was streamed without a declared size.
    #[error("body exceeds limit of {limit} bytes")]
    PayloadTooLarge { length: Option<usize>, limit: usize },

    #[error("failed to read request body: {0}")]
    BodyUnreadable(String),

    #[error("malformed signature: {0}")]
    MalformedSignature(#[from] SignatureError),

    #[error("signature does not match payload")]
    SignatureMismatch,

    #[error("payload is not valid JSON: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("event handler failed: {0:#}")]
    HandlerFailed(anyhow::Error),
}

/// JSON error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl DispatchError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::MissingSignature | Self::MissingEvent | Self::InvalidPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::MalformedSignature(_) | Self::SignatureMismatch => StatusCode::FORBIDDEN,
            Self::BodyUnreadable(_) | Self::HandlerFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show the sender.
    ///
    /// Both signature failures share one message so a sender cannot tell a
    /// malformed header from a wrong digest.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::MethodNotAllowed(_) => "method not allowed",
            Self::MissingSignature => "signature header is required",
            Self::MissingEvent => "event name is missing",
            Self::PayloadTooLarge { .. } => "payload too large",
            Self::BodyUnreadable(_) => "failed to read request body",
            Self::MalformedSignature(_) | Self::SignatureMismatch => FORBIDDEN_MESSAGE,
            Self::InvalidPayload(_) => "payload is not valid JSON",
            Self::HandlerFailed(_) => "internal server error",
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(ErrorResponse {
                error: self.public_message().to_string(),
            }),
        )
            .into_response()
    }
}

// =============================================================================
// Request types
// =============================================================================

/// A complete request, for callers that already hold the body in memory.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Headers extracted from a request that passed the preflight checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryHeaders {
    pub signature: String,
    pub event: String,
    pub delivery_id: Option<String>,
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Authenticates deliveries and hands them to the configured handler.
pub struct Dispatcher {
    verifier: SignatureVerifier,
    handler: Arc<dyn EventHandler>,
    env: HandlerEnv,
    max_body_bytes: usize,
}

impl Dispatcher {
    /// Create a dispatcher with the default body limit.
    ///
    /// `env` is handed to the handler on every delivery.
    pub fn new(verifier: SignatureVerifier, handler: Arc<dyn EventHandler>, env: HandlerEnv) -> Self {
        Self {
            verifier,
            handler,
            env,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Override the largest body accepted, in bytes.
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Checks that run before the body is read: method, required headers and
    /// the declared content length.
    pub fn preflight(
        &self,
        method: &Method,
        headers: &HeaderMap,
    ) -> Result<DeliveryHeaders, DispatchError> {
        if *method != Method::POST {
            warn!(method = %method, "webhook_method_not_allowed");
            return Err(DispatchError::MethodNotAllowed(method.clone()));
        }

        // A signature header with non-UTF-8 bytes is kept so it fails
        // verification rather than being reported as missing.
        let signature = headers
            .get(SIGNATURE_HEADER)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                warn!("webhook_signature_header_missing");
                DispatchError::MissingSignature
            })?;

        let event = header_str(headers, EVENT_HEADER)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                warn!("webhook_event_header_missing");
                DispatchError::MissingEvent
            })?
            .to_string();

        let delivery_id = header_str(headers, DELIVERY_HEADER).map(str::to_string);

        if let Some(declared) = header_str(headers, header::CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse::<usize>().ok())
        {
            self.check_body_size(declared, delivery_id.as_deref())?;
        }

        Ok(DeliveryHeaders {
            signature,
            event,
            delivery_id,
        })
    }

    /// Verify, parse and dispatch a delivery whose body has been captured.
    pub async fn deliver(
        &self,
        delivery: DeliveryHeaders,
        raw_body: Bytes,
    ) -> Result<HandlerResult, DispatchError> {
        let DeliveryHeaders {
            signature,
            event,
            delivery_id,
        } = delivery;

        info!(
            event = %event,
            delivery_id = ?delivery_id,
            body_length = raw_body.len(),
            "webhook_received"
        );

        match self.verifier.verify(&signature, &raw_body) {
            Ok(true) => {}
            Ok(false) => {
                warn!(event = %event, delivery_id = ?delivery_id, "signature_mismatch");
                return Err(DispatchError::SignatureMismatch);
            }
            Err(e) => {
                warn!(
                    event = %event,
                    delivery_id = ?delivery_id,
                    reason = %e,
                    "signature_malformed"
                );
                return Err(DispatchError::MalformedSignature(e));
            }
        }

        let payload: Value = serde_json::from_slice(&raw_body).map_err(|e| {
            warn!(
                event = %event,
                delivery_id = ?delivery_id,
                error = %e,
                "webhook_payload_invalid"
            );
            DispatchError::InvalidPayload(e)
        })?;

        let envelope = EventEnvelope { event, payload };

        let result = self
            .handler
            .handle(&envelope.event, envelope.payload, &self.env)
            .await
            .map_err(|e| {
                error!(
                    event = %envelope.event,
                    delivery_id = ?delivery_id,
                    error = %format!("{:#}", e),
                    "handler_failed"
                );
                DispatchError::HandlerFailed(e)
            })?;

        info!(
            event = %envelope.event,
            delivery_id = ?delivery_id,
            status = %result.status,
            "webhook_dispatched"
        );

        Ok(result)
    }

    /// Classify a failure to read the request body.
    ///
    /// A stream that runs past the body limit is the sender's fault and maps
    /// to [`DispatchError::PayloadTooLarge`]; anything else is a read failure.
    pub fn body_read_error(&self, err: axum::Error, delivery: &DeliveryHeaders) -> DispatchError {
        if exceeds_length_limit(&err) {
            warn!(
                event = %delivery.event,
                delivery_id = ?delivery.delivery_id,
                limit = self.max_body_bytes,
                "webhook_payload_too_large"
            );
            return DispatchError::PayloadTooLarge {
                length: None,
                limit: self.max_body_bytes,
            };
        }

        error!(
            event = %delivery.event,
            delivery_id = ?delivery.delivery_id,
            error = %err,
            "webhook_body_read_failed"
        );
        DispatchError::BodyUnreadable(err.to_string())
    }

    /// Run the whole sequence over a request whose body is already buffered.
    pub async fn dispatch(&self, request: IncomingRequest) -> Result<HandlerResult, DispatchError> {
        let delivery = self.preflight(&request.method, &request.headers)?;
        self.check_body_size(request.body.len(), delivery.delivery_id.as_deref())?;
        self.deliver(delivery, request.body).await
    }

    fn check_body_size(&self, length: usize, delivery_id: Option<&str>) -> Result<(), DispatchError> {
        if length > self.max_body_bytes {
            warn!(
                length = length,
                limit = self.max_body_bytes,
                delivery_id = ?delivery_id,
                "webhook_payload_too_large"
            );
            return Err(DispatchError::PayloadTooLarge {
                length: Some(length),
                limit: self.max_body_bytes,
            });
        }
        Ok(())
    }
}

fn exceeds_length_limit(err: &axum::Error) -> bool {
    std::error::Error::source(err).is_some_and(|source| source.is::<LengthLimitError>())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::GitHubEventHandler;
    use crate::web::signature::{sign, Secret};
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECRET: &str = "test-webhook-secret";

    /// Handler double that counts invocations.
    #[derive(Default)]
    struct RecordingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(
            &self,
            event: &str,
            _payload: Value,
            _env: &HandlerEnv,
        ) -> anyhow::Result<HandlerResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HandlerResult::new("recorded", "ok", event))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl EventHandler for FailingHandler {
        async fn handle(
            &self,
            _event: &str,
            _payload: Value,
            _env: &HandlerEnv,
        ) -> anyhow::Result<HandlerResult> {
            anyhow::bail!("downstream database password rejected")
        }
    }

    fn dispatcher_with(handler: Arc<dyn EventHandler>) -> Dispatcher {
        Dispatcher::new(
            SignatureVerifier::new(Secret::from(SECRET)),
            handler,
            HandlerEnv::default(),
        )
    }

    fn signed_request(event: &str, body: &str) -> IncomingRequest {
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&sign(SECRET.as_bytes(), body.as_bytes()).unwrap()).unwrap(),
        );
        headers.insert(EVENT_HEADER, HeaderValue::from_str(event).unwrap());
        IncomingRequest {
            method: Method::POST,
            headers,
            body: Bytes::from(body.to_string()),
        }
    }

    #[tokio::test]
    async fn test_non_post_rejected() {
        let dispatcher = dispatcher_with(Arc::new(RecordingHandler::default()));
        let mut request = signed_request("push", "{}");
        request.method = Method::GET;

        let err = dispatcher.dispatch(request).await.unwrap_err();

        assert!(matches!(err, DispatchError::MethodNotAllowed(_)));
        assert_eq!(err.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_missing_signature_header() {
        let dispatcher = dispatcher_with(Arc::new(RecordingHandler::default()));
        let mut request = signed_request("push", "{}");
        request.headers.remove(SIGNATURE_HEADER);

        let err = dispatcher.dispatch(request).await.unwrap_err();

        assert!(matches!(err, DispatchError::MissingSignature));
        assert_eq!(err.public_message(), "signature header is required");
    }

    #[tokio::test]
    async fn test_empty_signature_header_counts_as_missing() {
        let dispatcher = dispatcher_with(Arc::new(RecordingHandler::default()));
        let mut request = signed_request("push", "{}");
        request
            .headers
            .insert(SIGNATURE_HEADER, HeaderValue::from_static(""));

        let err = dispatcher.dispatch(request).await.unwrap_err();

        assert!(matches!(err, DispatchError::MissingSignature));
    }

    #[tokio::test]
    async fn test_missing_event_header() {
        let dispatcher = dispatcher_with(Arc::new(RecordingHandler::default()));
        let mut request = signed_request("push", "{}");
        request.headers.remove(EVENT_HEADER);

        let err = dispatcher.dispatch(request).await.unwrap_err();

        assert!(matches!(err, DispatchError::MissingEvent));
        assert_eq!(err.public_message(), "event name is missing");
    }

    #[tokio::test]
    async fn test_signature_checked_before_event_header() {
        let dispatcher = dispatcher_with(Arc::new(RecordingHandler::default()));
        let request = IncomingRequest {
            method: Method::POST,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"{}"),
        };

        let err = dispatcher.dispatch(request).await.unwrap_err();

        assert!(matches!(err, DispatchError::MissingSignature));
    }

    #[tokio::test]
    async fn test_mismatched_signature_skips_handler() {
        let handler = Arc::new(RecordingHandler::default());
        let dispatcher = dispatcher_with(handler.clone());
        let mut request = signed_request("push", r#"{"a":1}"#);
        request.body = Bytes::from_static(br#"{"a":2}"#);

        let err = dispatcher.dispatch(request).await.unwrap_err();

        assert!(matches!(err, DispatchError::SignatureMismatch));
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_signature_skips_handler() {
        let handler = Arc::new(RecordingHandler::default());
        let dispatcher = dispatcher_with(handler.clone());
        let mut request = signed_request("push", "{}");
        request
            .headers
            .insert(SIGNATURE_HEADER, HeaderValue::from_static("sha256=xyz"));

        let err = dispatcher.dispatch(request).await.unwrap_err();

        assert!(matches!(err, DispatchError::MalformedSignature(_)));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_signature_failures_share_public_response() {
        let malformed = DispatchError::MalformedSignature(SignatureError::MissingSeparator);
        let mismatch = DispatchError::SignatureMismatch;

        assert_eq!(malformed.status_code(), mismatch.status_code());
        assert_eq!(malformed.public_message(), mismatch.public_message());
    }

    #[tokio::test]
    async fn test_signed_invalid_json_is_bad_request() {
        let handler = Arc::new(RecordingHandler::default());
        let dispatcher = dispatcher_with(handler.clone());

        let err = dispatcher
            .dispatch(signed_request("push", "{not json"))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::InvalidPayload(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_error_is_generic() {
        let dispatcher = dispatcher_with(Arc::new(FailingHandler));

        let err = dispatcher
            .dispatch(signed_request("push", "{}"))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "internal server error");
        assert!(!err.public_message().contains("password"));
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let handler = Arc::new(RecordingHandler::default());
        let dispatcher = dispatcher_with(handler.clone()).with_max_body_bytes(8);

        let err = dispatcher
            .dispatch(signed_request("push", r#"{"long":"payload"}"#))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::PayloadTooLarge { limit: 8, .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_declared_content_length_checked_in_preflight() {
        let dispatcher = dispatcher_with(Arc::new(RecordingHandler::default())).with_max_body_bytes(8);
        let mut request = signed_request("push", "{}");
        request
            .headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from_static("1024"));

        let err = dispatcher
            .preflight(&request.method, &request.headers)
            .unwrap_err();

        assert!(matches!(err, DispatchError::PayloadTooLarge { length: Some(1024), .. }));
    }

    #[tokio::test]
    async fn test_streamed_overflow_is_payload_too_large() {
        let dispatcher = dispatcher_with(Arc::new(RecordingHandler::default())).with_max_body_bytes(4);
        let delivery = dispatcher
            .preflight(&Method::POST, &signed_request("push", "{}").headers)
            .unwrap();

        let read_err = axum::body::to_bytes(axum::body::Body::from("0123456789"), 4)
            .await
            .unwrap_err();
        let err = dispatcher.body_read_error(read_err, &delivery);

        assert!(matches!(err, DispatchError::PayloadTooLarge { length: None, limit: 4 }));
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_other_body_read_errors_are_internal() {
        let dispatcher = dispatcher_with(Arc::new(RecordingHandler::default()));
        let delivery = DeliveryHeaders {
            signature: "sha256=00".to_string(),
            event: "push".to_string(),
            delivery_id: None,
        };

        let read_err = axum::Error::new(std::io::Error::other("connection reset"));
        let err = dispatcher.body_read_error(read_err, &delivery);

        assert!(matches!(err, DispatchError::BodyUnreadable(_)));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_valid_delivery_reaches_handler() {
        let handler = Arc::new(RecordingHandler::default());
        let dispatcher = dispatcher_with(handler.clone());

        let result = dispatcher
            .dispatch(signed_request("ping", r#"{"zen":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(result.event, "ping");
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_push_end_to_end() {
        let dispatcher = dispatcher_with(Arc::new(GitHubEventHandler::new()));
        let body = r#"{"ref":"refs/heads/main","commits":[{}, {}],"pusher":{"name":"alice"}}"#;

        let result = dispatcher
            .dispatch(signed_request("push", body))
            .await
            .unwrap();

        assert_eq!(result.message, "Processed 2 commit(s) on main");
    }

    #[tokio::test]
    async fn test_repeated_delivery_is_not_deduplicated() {
        let handler = Arc::new(RecordingHandler::default());
        let dispatcher = dispatcher_with(handler.clone());
        let request = signed_request("push", r#"{"same":true}"#);

        let first = dispatcher.dispatch(request.clone()).await.unwrap();
        let second = dispatcher.dispatch(request).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_delivery_id_captured() {
        let dispatcher = dispatcher_with(Arc::new(RecordingHandler::default()));
        let mut request = signed_request("push", "{}");
        request.headers.insert(
            DELIVERY_HEADER,
            HeaderValue::from_static("72d3162e-cc78-11e3-81ab-4c9367dc0958"),
        );

        let delivery = dispatcher
            .preflight(&request.method, &request.headers)
            .unwrap();

        assert_eq!(
            delivery.delivery_id.as_deref(),
            Some("72d3162e-cc78-11e3-81ab-4c9367dc0958")
        );
    }
}
