//! Quire - a federated social reading server
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - JSON API for feeds, statuses, shelves, imports, settings │
//! │  - ActivityPub endpoints                                    │
//! │  - Well-known endpoints (webfinger, nodeinfo)               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - Feed visibility, statuses, accounts, imports             │
//! │  - Background task queue (broadcast, imports)               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx)                                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `service`: Business logic layer
//! - `federation`: ActivityPub serialization, signatures and delivery
//! - `tasks`: Background task queue
//! - `data`: Database layer
//! - `auth`: Session tokens
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod pagination;
pub mod service;
pub mod tasks;

use std::sync::Arc;

/// Version advertised in nodeinfo and the User-Agent
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application state shared across all handlers
///
/// This struct is cloned for each request and contains
/// shared resources like the database pool and HTTP client.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// HTTP client for federation
    pub http_client: Arc<reqwest::Client>,

    /// Background work
    pub tasks: tasks::SharedTaskSink,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Build the federation HTTP client
    /// 3. Start the task worker
    /// 4. Ensure the admin user exists
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let db = data::Database::connect(&config.database.path).await?;
        tracing::info!(path = %config.database.path.display(), "Database connected");

        let http_client = build_http_client(&config.server.base_url())?;

        let (queue, receiver) = tasks::TaskQueue::channel();
        let state = Self {
            config: Arc::new(config),
            db: Arc::new(db),
            http_client: Arc::new(http_client),
            tasks: Arc::new(queue),
        };
        tasks::spawn_worker(state.clone(), receiver);
        tracing::info!("Task worker started");

        service::AccountService::from_state(&state)
            .ensure_admin_user(&state.config.admin)
            .await?;

        metrics::USERS_TOTAL.set(state.db.count_local_users().await?);
        metrics::POSTS_TOTAL.set(state.db.count_local_statuses().await?);

        tracing::info!("Application state initialized successfully");
        Ok(state)
    }
}

/// HTTP client used for every outbound federation request
///
/// The User-Agent carries `(Quire/x.y.z; +base_url)` so peers can tell
/// they are talking to Quire.
pub fn build_http_client(base_url: &str) -> Result<reqwest::Client, error::AppError> {
    reqwest::Client::builder()
        .user_agent(user_agent(base_url))
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| error::AppError::Internal(e.into()))
}

pub fn user_agent(base_url: &str) -> String {
    format!("reqwest (Quire/{}; +{})", VERSION, base_url)
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{compression::CompressionLayer, trace::TraceLayer};

    let cors_layer = build_cors_layer(&state.config.server);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::wellknown_router())
        .merge(api::activitypub_router())
        .nest("/api", api::json_api_router())
        .merge(api::metrics_router())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    if !server.protocol.eq_ignore_ascii_case("https") {
        return CorsLayer::permissive();
    }

    let allowed_origin = server.base_url();
    match HeaderValue::from_str(&allowed_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin([origin])
            .allow_methods(Any)
            .allow_headers(Any),
        Err(error) => {
            tracing::error!(
                %error,
                origin = %allowed_origin,
                "Failed to parse CORS origin from server base URL; denying cross-origin requests"
            );
            CorsLayer::new().allow_methods(Any).allow_headers(Any)
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}
