//! chat-relay-gateway server entry point.
//!
//! Starts the Axum HTTP server with REST and WebSocket endpoints.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use chat_relay_gateway::app_state::{AppState, SessionLimits};
use chat_relay_gateway::build_app;
use chat_relay_gateway::config::{GatewayConfig, LogFormat};
use chat_relay_gateway::domain::{ConnectionRegistry, ConnectionStatus, Envelope};
use chat_relay_gateway::producer::OpenAiProducer;
use chat_relay_gateway::service::ChatService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = GatewayConfig::from_env()
        .map_err(|err| anyhow::anyhow!("invalid configuration: {err}"))?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(addr = %config.listen_addr, model = %config.openai_model, "starting chat-relay-gateway");

    // Build producer and service layer
    let producer = OpenAiProducer::new(
        &config.openai_base_url,
        config.openai_api_key.clone(),
        Duration::from_secs(config.connect_timeout_secs),
    )
    .context("failed to build completion client")?;
    let chat_service = Arc::new(ChatService::new(
        Arc::new(producer),
        config.completion_settings(),
    ));

    if chat_service.probe().await {
        tracing::info!("completion provider accepted credentials");
    } else {
        tracing::warn!("completion provider probe failed; continuing");
    }

    // Build application state
    let limits = SessionLimits {
        max_message_chars: config.max_message_chars,
        history_max_turns: config.history_max_turns,
    };
    let app_state = AppState::new(chat_service, limits);
    let registry = Arc::clone(&app_state.registry);

    let app = build_app(app_state, &config.cors_origins);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

/// Resolves on Ctrl-C after telling every live connection we are going away.
async fn shutdown_signal(registry: Arc<ConnectionRegistry>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    let notice = Envelope::status(
        ConnectionStatus::Disconnected,
        Some("server shutting down".to_string()),
        None,
    );
    let notified = registry.broadcast(&notice).await;
    tracing::info!(notified, "shutdown signal received");
}
