//! Hookgate Web Server - GitHub webhook receiver.
//!
//! This binary provides a web server that:
//! - Receives GitHub webhook deliveries
//! - Verifies their HMAC-SHA256 signatures
//! - Hands authenticated events to the event handler
//! - Returns the handler's result as JSON

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hookgate::{router, AppState, Config, Dispatcher, GitHubEventHandler, SignatureVerifier};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    // Load configuration
    let config = Config::from_env();
    let secret = config.validate().context("Invalid configuration")?;

    let handler_env = config.handler_env();
    info!(
        port = config.port,
        webhook_path = %config.webhook_path,
        max_body_bytes = config.max_body_bytes,
        handler_env_vars = handler_env.len(),
        "config_loaded"
    );

    // Create application state
    let dispatcher = Dispatcher::new(
        SignatureVerifier::new(secret),
        Arc::new(GitHubEventHandler::new()),
        handler_env,
    )
    .with_max_body_bytes(config.max_body_bytes);
    let state = AppState::new(dispatcher);

    // Build the router
    let app = router(state, &config.webhook_path);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
