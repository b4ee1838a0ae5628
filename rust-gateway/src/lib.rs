//! Hookgate - authenticated GitHub webhook ingress.
//!
//! This library provides the pieces used by the `hookgate-web` binary:
//! - `web::signature`: HMAC-SHA256 verification of `X-Hub-Signature-256`
//! - `web::dispatcher`: per-request validation and dispatch
//! - `event`: the handler contract and a reference GitHub handler
//!
//! ## Architecture
//!
//! ```text
//! GitHub → Web Server → Signature Verifier → EventHandler → JSON response
//! ```

pub mod config;
pub mod event;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use event::{EventEnvelope, EventHandler, GitHubEventHandler, HandlerEnv, HandlerResult};
pub use web::{router, AppState, DispatchError, Dispatcher, Secret, SignatureVerifier};
