use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use recipe_limiter::config::LimiterConfig;
use recipe_limiter::http::{AppState, HttpServer};
use recipe_limiter::ratelimit::SlidingWindowLimiter;
use recipe_limiter::store::{EventStore, RedisStore};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Per-user sliding-window rate limiter for recipe generation.
#[derive(Debug, Parser)]
#[command(name = "recipe-limiter", version)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
    }

    info!("Starting Recipe Limiter");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = LimiterConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.http_addr = listen;
    }
    info!(
        http_addr = %config.server.http_addr,
        limit = config.rate_limiting.limit,
        window_ms = config.rate_limiting.window_ms,
        "Configuration loaded"
    );

    let store: Arc<dyn EventStore> = Arc::new(RedisStore::new(&config.store)?);
    if let Err(e) = store.ping().await {
        warn!(error = %e, "Event store not answering, rate limiting will fail open until it recovers");
    }

    let limiter = SlidingWindowLimiter::from_config(store.clone(), &config.rate_limiting)?;
    info!("Rate limiter initialized");

    let state = AppState::new(Arc::new(limiter), store, &config.server.identity_header)?;

    HttpServer::new(config.server.http_addr, state)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Recipe Limiter stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
