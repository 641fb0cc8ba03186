use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vk_core::client::ksql::KsqlClientFactory;
use vk_core::datasource::Datasource;

mod api;
mod config;
mod stream;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(
    name = "vk-hub",
    version,
    about = "VOYAGER-KSQL datasource backend"
)]
struct Args {
    /// Server bind address
    #[arg(long, default_value = "127.0.0.1:3100")]
    bind: String,

    /// Path to config file
    #[arg(long, default_value = "vk-hub.toml")]
    config: PathBuf,

    /// Datasource settings as a JSON document, replacing `[datasource]`
    #[arg(long)]
    settings: Option<PathBuf>,
}

// =============================================================================
// Application State
// =============================================================================

pub struct AppState {
    datasource: Datasource,
    start_time: Instant,
    channel_capacity: usize,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "vk_hub=info,vk_core=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = match config::Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(2);
        }
    };
    if let Some(path) = &args.settings {
        if let Err(e) = config.load_settings_json(path) {
            tracing::error!("{}", e);
            std::process::exit(2);
        }
    }

    let settings = config.plugin_settings(&config::secrets_from_env());
    if !settings.has_server() {
        tracing::warn!("No ksqlDB server configured; health checks will fail");
    }

    let state = Arc::new(AppState {
        datasource: Datasource::new(
            settings,
            Arc::new(KsqlClientFactory),
            config.datasource_options(),
        ),
        start_time: Instant::now(),
        channel_capacity: config.stream.channel_capacity.max(1),
    });

    let app = Router::new()
        .route("/api/status", get(api::status))
        .route("/api/health", get(api::check_health))
        .route("/api/stream/subscribe", post(api::subscribe_stream))
        .route("/api/stream/publish", post(api::publish_stream))
        .route("/ws/stream", get(stream::stream_ws))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let addr: SocketAddr = match args.bind.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Invalid bind address '{}': {}", args.bind, e);
            std::process::exit(2);
        }
    };
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("  VOYAGER-KSQL v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("  API:        http://{}/api/health", addr);
    tracing::info!("  Stream:     ws://{}/ws/stream", addr);
    tracing::info!("  ksqlDB:     {}", state.datasource.settings().ksql_server);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    let shutdown_state = state.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down, cancelling open streams");
            shutdown_state.datasource.dispose();
        })
        .await;
    if let Err(e) = served {
        tracing::error!("Server error: {}", e);
    }
}
