//! Well-known endpoints
//!
//! - /.well-known/webfinger
//! - /.well-known/nodeinfo
//! - /.well-known/host-meta

use axum::{
    Router,
    extract::{Query, State},
    response::{IntoResponse, Json},
    routing::get,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::federation::{WebFingerResponse, generate_webfinger_response, parse_address};

/// Create well-known router
///
/// Routes:
/// - GET /.well-known/webfinger
/// - GET /.well-known/nodeinfo
/// - GET /.well-known/host-meta
/// - GET /nodeinfo/2.0
pub fn wellknown_router() -> Router<AppState> {
    Router::new()
        .route("/.well-known/webfinger", get(webfinger))
        .route("/.well-known/nodeinfo", get(nodeinfo_links))
        .route("/.well-known/host-meta", get(host_meta))
        .route("/nodeinfo/2.0", get(nodeinfo))
}

/// WebFinger query parameters
#[derive(Debug, Deserialize)]
struct WebFingerQuery {
    resource: String,
}

/// GET /.well-known/webfinger
///
/// Query: ?resource=acct:localname@domain
async fn webfinger(
    State(state): State<AppState>,
    Query(query): Query<WebFingerQuery>,
) -> Result<impl IntoResponse, AppError> {
    if !query.resource.starts_with("acct:") {
        return Err(AppError::Validation(
            "Resource must start with 'acct:'".to_string(),
        ));
    }
    let (localname, domain) = parse_address(&query.resource)
        .ok_or_else(|| AppError::Validation("Invalid acct format".to_string()))?;

    if domain != state.config.server.domain.to_ascii_lowercase() {
        return Err(AppError::NotFound);
    }

    let user = state
        .db
        .get_user_by_localname(&localname)
        .await?
        .ok_or(AppError::NotFound)?;

    let jrd: WebFingerResponse =
        generate_webfinger_response(&localname, &state.config.server.domain, &user.remote_id);
    Ok(([("Content-Type", "application/jrd+json")], Json(jrd)))
}

/// GET /.well-known/nodeinfo
async fn nodeinfo_links(State(state): State<AppState>) -> Json<serde_json::Value> {
    let base_url = state.config.server.base_url();
    Json(serde_json::json!({
        "links": [
            {
                "rel": "http://nodeinfo.diaspora.software/ns/schema/2.0",
                "href": format!("{}/nodeinfo/2.0", base_url)
            }
        ]
    }))
}

/// GET /nodeinfo/2.0
async fn nodeinfo(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let users = state.db.count_local_users().await?;
    let posts = state.db.count_local_statuses().await?;
    let site = state.db.get_site_settings().await?;

    Ok(Json(serde_json::json!({
        "version": "2.0",
        "software": {
            "name": "quire",
            "version": crate::VERSION
        },
        "protocols": ["activitypub"],
        "services": {
            "inbound": [],
            "outbound": []
        },
        "openRegistrations": site.allow_registration,
        "usage": {
            "users": {
                "total": users
            },
            "localPosts": posts
        },
        "metadata": {
            "nodeName": site.name
        }
    })))
}

/// GET /.well-known/host-meta
async fn host_meta(State(state): State<AppState>) -> impl IntoResponse {
    let base_url = state.config.server.base_url();
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<XRD xmlns="http://docs.oasis-open.org/ns/xri/xrd-1.0">
  <Link rel="lrdd" template="{}/.well-known/webfinger?resource={{uri}}"/>
</XRD>"#,
        base_url
    );

    ([("Content-Type", "application/xrd+xml")], xml)
}
