//! Ceremony Server - REST API for passkey registration and authentication
//!
//! Wires the ceremony core to a WebAuthn validator and credential storage,
//! and exposes the start/finish endpoints the browser client drives.

use std::sync::Arc;

use ceremony_server::{create_router, AppState, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Structured logging, overridable with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ceremony_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(?config, "Configuration loaded");

    let state = match AppState::from_env(&config).await {
        Ok(state) => Arc::new(state),
        Err(error) => {
            tracing::error!(%error, "Failed to initialize application state");
            std::process::exit(1);
        }
    };

    // Periodic sweep: expired challenges are removed and their attempt
    // slots released. Lazy expiry on finish remains the correctness
    // mechanism; this bounds memory.
    let sweep_state = state.clone();
    let sweep_interval = std::time::Duration::from_secs(config.sweep_interval_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            let swept = sweep_state.machine.sweep_expired();
            if swept > 0 {
                tracing::debug!(swept, "Swept expired ceremonies");
            }
        }
    });

    let app = create_router(&config, state);

    let addr = config.socket_addr();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app)
        .await
        .expect("Server error");
}
