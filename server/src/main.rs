#![allow(missing_docs)]

use axum::{middleware, routing::get, Router};
use clap::Parser;
use sankhya_config::{GatewayConfig, LogFormat};
use sankhya_gateway::{api, recorder, state};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sankhya Gateway - cached, token-managed access to the Sankhya ERP.
#[derive(Parser)]
#[command(name = "sankhya-gateway")]
#[command(about = "Cached, token-managed HTTP gateway for the Sankhya ERP")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", env = "SANKHYA_GATEWAY_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => sankhya_config::load_from_file(path).unwrap_or_else(|e| {
            eprintln!("Error: Failed to load config from {path}: {e}");
            std::process::exit(1);
        }),
        None => sankhya_config::load().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config: {e}, using defaults");
            GatewayConfig::default()
        }),
    };
    if let Err(e) = config.validate() {
        eprintln!("Error: Invalid configuration: {e}");
        std::process::exit(1);
    }

    init_logging(&config);

    let state = match state::AppState::from_config(&config).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize gateway");
            std::process::exit(1);
        }
    };

    let mut app = api::create_router(state);
    if config.server.metrics.enabled {
        match recorder::init_metrics() {
            Ok(handle) => {
                let metrics_routes = Router::new()
                    .route(&config.server.metrics.path, get(recorder::metrics_handler))
                    .with_state(handle);
                app = app
                    .merge(metrics_routes)
                    .layer(middleware::from_fn(recorder::metrics_middleware));
                tracing::info!(path = %config.server.metrics.path, "Prometheus metrics enabled");
            }
            Err(e) => tracing::warn!(error = %e, "Failed to install metrics recorder"),
        }
    }
    let app = app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!(base_url = %config.sankhya.base_url, "Sankhya Gateway listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

fn init_logging(config: &GatewayConfig) {
    let filter = if config.logging.filter.is_empty() {
        config.logging.level.as_str().to_string()
    } else {
        config.logging.filter.clone()
    };

    let registry = tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(filter));
    match config.logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Compact => registry.with(tracing_subscriber::fmt::layer().compact()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
