//! Reference handler for GitHub events.
//!
//! Summarises `push` and `pull_request` deliveries and acknowledges
//! everything else. Replace or wrap it to trigger deployments, notifications
//! and the like.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{EventHandler, HandlerEnv, HandlerResult};

const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// Default [`EventHandler`] for GitHub deliveries.
#[derive(Debug, Clone, Default)]
pub struct GitHubEventHandler;

impl GitHubEventHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventHandler for GitHubEventHandler {
    async fn handle(&self, event: &str, payload: Value, env: &HandlerEnv) -> Result<HandlerResult> {
        info!(event = %event, env_vars = env.len(), "github_event_received");

        match event {
            "push" => handle_push(event, &payload),
            "pull_request" => handle_pull_request(event, &payload),
            _ => Ok(HandlerResult::new(
                "received",
                format!("Event {} acknowledged", event),
                event,
            )),
        }
    }
}

fn handle_push(event: &str, payload: &Value) -> Result<HandlerResult> {
    let git_ref = payload
        .get("ref")
        .and_then(Value::as_str)
        .context("push payload has no string `ref`")?;
    let branch = git_ref.strip_prefix(BRANCH_REF_PREFIX).unwrap_or(git_ref);

    let commits = payload
        .get("commits")
        .and_then(Value::as_array)
        .map(Vec::len)
        .context("push payload has no `commits` array")?;

    let pusher = payload
        .pointer("/pusher/name")
        .and_then(Value::as_str)
        .context("push payload has no `pusher.name`")?;

    info!(branch = %branch, pusher = %pusher, commits = commits, "github_push");

    Ok(HandlerResult::new(
        "success",
        format!("Processed {} commit(s) on {}", commits, branch),
        event,
    ))
}

fn handle_pull_request(event: &str, payload: &Value) -> Result<HandlerResult> {
    let action = payload
        .get("action")
        .and_then(Value::as_str)
        .context("pull_request payload has no `action`")?;

    let number = payload
        .pointer("/pull_request/number")
        .and_then(Value::as_u64)
        .context("pull_request payload has no `pull_request.number`")?;

    let title = payload
        .pointer("/pull_request/title")
        .and_then(Value::as_str)
        .context("pull_request payload has no `pull_request.title`")?;

    info!(number = number, action = %action, title = %title, "github_pull_request");

    Ok(HandlerResult::new(
        "success",
        format!("Processed PR #{} ({})", number, action),
        event,
    ))
}
