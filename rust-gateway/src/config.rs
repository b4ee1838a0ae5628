//! Configuration module for environment variable parsing.
//!
//! Reads all configuration from environment variables. The webhook secret is
//! the only required value.

use std::env;

use thiserror::Error;
use tracing::warn;

use crate::event::HandlerEnv;
use crate::web::{Secret, DEFAULT_MAX_BODY_BYTES};

/// Environment variable holding the webhook secret.
pub const SECRET_ENV_VAR: &str = "GITHUB_WEBHOOK_SECRET";

/// Route the webhook is served on unless `WEBHOOK_PATH` says otherwise.
pub const DEFAULT_WEBHOOK_PATH: &str = "/webhook/v1/fetch";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("GITHUB_WEBHOOK_SECRET is not set or empty")]
    MissingSecret,

    #[error("webhook path '{0}' must start with '/'")]
    InvalidWebhookPath(String),
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// Shared secret for HMAC signature verification
    pub webhook_secret: Option<Secret>,

    /// Route the webhook endpoint is mounted on
    pub webhook_path: String,

    /// Largest request body accepted, in bytes
    pub max_body_bytes: usize,

    /// Names of environment variables forwarded to the event handler
    pub handler_env_vars: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            port: env::var("PORT")
                .ok()
                .and_then(|v| parse_or_warn("PORT", &v))
                .unwrap_or(8080),

            webhook_secret: env::var(SECRET_ENV_VAR)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(Secret::from),

            webhook_path: env::var("WEBHOOK_PATH")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_WEBHOOK_PATH.to_string()),

            max_body_bytes: env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|v| parse_or_warn("MAX_BODY_BYTES", &v))
                .unwrap_or(DEFAULT_MAX_BODY_BYTES),

            handler_env_vars: parse_csv("HANDLER_ENV_VARS").unwrap_or_default(),
        }
    }

    /// Check the values the server cannot start without and hand back the
    /// webhook secret.
    pub fn validate(&self) -> Result<Secret, ConfigError> {
        let secret = self
            .webhook_secret
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSecret)?;
        if !self.webhook_path.starts_with('/') {
            return Err(ConfigError::InvalidWebhookPath(self.webhook_path.clone()));
        }
        Ok(secret)
    }

    /// Snapshot the forwarded environment variables for the event handler.
    ///
    /// Unset variables are skipped. The secret is never forwarded, even if
    /// listed.
    pub fn handler_env(&self) -> HandlerEnv {
        self.handler_env_vars
            .iter()
            .filter(|name| {
                if name.as_str() == SECRET_ENV_VAR {
                    warn!(env_var = %name, "handler_env_secret_skipped");
                    return false;
                }
                true
            })
            .filter_map(|name| env::var(name).ok().map(|value| (name.clone(), value)))
            .collect()
    }
}

/// Parse a value, logging and discarding it when malformed.
fn parse_or_warn<T: std::str::FromStr>(name: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}

/// Parse a comma-separated list of strings.
fn parse_csv(name: &str) -> Option<Vec<String>> {
    env::var(name).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}
