//! Event handling contract.
//!
//! Once a delivery has been authenticated and its payload parsed, the
//! dispatcher hands it to an [`EventHandler`]. The handler owns all business
//! logic and decides the shape of the JSON response.
//!
//! ## Flow
//!
//! ```text
//! EventEnvelope → EventHandler::handle() → HandlerResult → JSON response
//! ```

pub mod github;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use github::GitHubEventHandler;

/// Authenticated event handed to the handler.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    /// Event type from the `X-GitHub-Event` header
    pub event: String,
    /// Parsed JSON payload; no fixed schema
    pub payload: Value,
}

/// Result returned by a handler and serialized verbatim as the response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerResult {
    pub status: String,
    pub message: String,
    /// Echo of the event type
    pub event: String,
    /// Additional handler-defined fields; never holds the three keys above
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl HandlerResult {
    pub fn new(
        status: impl Into<String>,
        message: impl Into<String>,
        event: impl Into<String>,
    ) -> Self {
        Self {
            status: status.into(),
            message: message.into(),
            event: event.into(),
            extra: Map::new(),
        }
    }

    /// Attach an extra top-level field to the response.
    ///
    /// `status`, `message` and `event` replace the typed fields instead of
    /// being added a second time; non-string values are stored as their JSON
    /// text.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        let slot = match key.as_str() {
            "status" => Some(&mut self.status),
            "message" => Some(&mut self.message),
            "event" => Some(&mut self.event),
            _ => None,
        };
        match slot {
            Some(slot) => {
                *slot = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                }
            }
            None => {
                self.extra.insert(key, value);
            }
        }
        self
    }

    /// Additional fields attached with [`HandlerResult::with_field`].
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

/// Read-only environment forwarded to the handler.
///
/// Holds the variables listed in `HANDLER_ENV_VARS`. The webhook secret is
/// never part of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerEnv {
    vars: BTreeMap<String, String>,
}

impl HandlerEnv {
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// Value of a forwarded variable, if it was set at startup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl FromIterator<(String, String)> for HandlerEnv {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

/// Business logic invoked once per authenticated delivery.
///
/// Implementations may await I/O; the dispatcher does not respond until the
/// returned future completes. Errors are logged by the dispatcher and turned
/// into a generic 500 response, so their text never reaches the sender.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(
        &self,
        event: &str,
        payload: Value,
        env: &HandlerEnv,
    ) -> anyhow::Result<HandlerResult>;
}
