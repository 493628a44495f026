//! Quire binary entry point

use quire::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging
/// 3. Initialize metrics
/// 4. Initialize AppState (database, task worker, admin user)
/// 5. Build Axum router
/// 6. Start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration
    let config = config::AppConfig::load()?;

    // 2. Initialize tracing/logging
    let default_filter = format!("quire={},tower_http=debug", config.logging.level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!(version = quire::VERSION, "Starting Quire...");
    tracing::info!(
        domain = %config.server.domain,
        protocol = %config.server.protocol,
        "Configuration loaded"
    );

    // 3. Initialize metrics
    quire::metrics::init_metrics();

    // 4. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 5. Build Axum router
    let app = quire::build_router(state);

    // 6. Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.base_url());

    axum::serve(listener, app).await?;

    Ok(())
}
