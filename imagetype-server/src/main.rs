//! Imagetype Server - HTTP entry point for the classification pipeline
//!
//! Endpoints:
//! - POST /classify - Classify the images of one product (task handler)
//! - POST /push     - Run the distributor once (scheduler trigger)
//! - GET  /health   - Health check

use std::process::ExitCode;

use imagetype_server::{create_router_with_config, AppState, Config, LogFormat};
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("imagetype_server=info,imagetype_core=info,tower_http=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match format {
        LogFormat::Json => builder.json().flatten_event(true).init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(LogFormat::default());
            tracing::error!(error = %e, "Invalid server configuration");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.log_format);

    let state = match AppState::from_env(config.role) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(role = ?config.role, error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        role = ?config.role,
        classifier = state.classifier.is_some(),
        distributor = state.distributor.is_some(),
        "Flows configured"
    );

    let app = create_router_with_config(state, &config);
    let addr = config.socket_addr();

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(%addr, "Listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
