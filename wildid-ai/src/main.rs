//! wildid-ai - Organism Recognition Microservice
//!
//! **Module Identity:**
//! - Name: wildid-ai
//! - Default port: 5780
//!
//! Identifies a flower, bug or animal in a photo by fusing several recognition
//! providers into one canonical species answer.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

use wildid_ai::config::ServiceConfig;
use wildid_ai::providers::ProviderSet;
use wildid_ai::{AppState, Recognizer};

#[derive(Parser, Debug)]
#[command(name = "wildid-ai")]
#[command(about = "Organism recognition microservice for wildid")]
#[command(version)]
struct Args {
    /// Path to wildid.toml (else WILDID_CONFIG, else the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides [server] port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logging first so config resolution is visible; RUST_LOG wins over the
    // configured level
    let env_filter = EnvFilter::try_from_default_env().ok();
    let env_override = env_filter.is_some();
    let (filter, filter_handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|| log_filter("info")));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config =
        ServiceConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if !env_override {
        if let Err(e) = filter_handle.reload(log_filter(&config.logging.level)) {
            warn!("Failed to apply configured log level: {}", e);
        }
    }

    info!("Starting wildid-ai (Organism Recognition) microservice");
    info!(
        "Version: {} ({}, {} build at {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    );
    if config.vision_api_key.is_none() {
        warn!("No Vision API key configured; Vision and iNaturalist will contribute nothing");
    }
    if config.plant_id_api_key.is_none() {
        warn!("No Plant.id API key configured; Plant-ID will contribute nothing");
    }

    let providers =
        ProviderSet::from_config(&config).context("Failed to build provider clients")?;

    // Invalid fusion configuration is fatal here, never per request
    let recognizer = Recognizer::new(providers, config.fusion.clone(), &config.cache)
        .context("Invalid [fusion] configuration")?;

    let state = AppState::new(recognizer, &config.server);
    let shutdown = state.shutdown.clone();
    let app = wildid_ai::build_router(state);

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Service crates at `level`, HTTP tracing at info
fn log_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!(
        "wildid_ai={level},wildid_common={level},tower_http=info"
    ))
}

/// Wait for Ctrl+C or SIGTERM, then cancel in-flight recognitions
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
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
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }

    shutdown.cancel();
}
