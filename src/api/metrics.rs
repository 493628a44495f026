//! Prometheus scrape endpoint

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TextEncoder};

use crate::AppState;
use crate::auth::CurrentUser;
use crate::metrics::{POSTS_TOTAL, REGISTRY, USERS_TOTAL};

/// GET /metrics
///
/// Requires a session. Counts of local users and posts are read fresh from the database; a
/// failed read leaves the previous values in place.
async fn scrape(State(state): State<AppState>, _viewer: CurrentUser) -> Response {
    match state.db.count_local_users().await {
        Ok(users) => USERS_TOTAL.set(users),
        Err(error) => tracing::warn!(%error, "Failed to count local users"),
    }
    match state.db.count_local_statuses().await {
        Ok(posts) => POSTS_TOTAL.set(posts),
        Err(error) => tracing::warn!(%error, "Failed to count local statuses"),
    }

    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&REGISTRY.gather()) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            body,
        )
            .into_response(),
        Err(error) => {
            tracing::error!(%error, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// Create metrics router
pub fn metrics_router() -> Router<AppState> {
    Router::new().route("/metrics", get(scrape))
}
