//! ActivityPub endpoints
//!
//! - Actor documents
//! - Statuses and their replies, in the format the requester understands
//! - Inboxes (activity receiving)

use axum::body::Bytes;
use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde_json::Value;

use crate::AppState;
use crate::api::dto::{PageParams, StatusResponse};
use crate::auth::MaybeUser;
use crate::data::{Status, User};
use crate::error::AppError;
use crate::federation::{ACTIVITY_JSON, Format, InboxProcessor, local_actor_document};
use crate::metrics::{
    FEDERATION_REQUEST_DURATION_SECONDS, HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL,
};
use crate::service::helpers::{is_api_request, is_quire_request};
use crate::service::{AccountService, StatusService};

/// Create ActivityPub router
///
/// Routes:
/// - GET /user/:username - Actor document
/// - GET /user/:username/status/:id - Status (`.json` suffix allowed)
/// - GET /user/:username/status/:id/replies - Replies collection
/// - POST /user/:username/inbox - Personal inbox
/// - POST /inbox - Shared inbox
pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route("/user/:username", get(actor))
        .route("/user/:username/status/:id", get(status))
        .route("/user/:username/status/:id/replies", get(replies))
        .route("/user/:username/inbox", post(inbox))
        .route("/inbox", post(shared_inbox))
}

fn activity_response(body: Value) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, ACTIVITY_JSON)],
        Json(body),
    )
        .into_response()
}

async fn local_user(state: &AppState, localname: &str) -> Result<User, AppError> {
    state
        .db
        .get_user_by_localname(localname)
        .await?
        .filter(|u| u.local)
        .ok_or(AppError::NotFound)
}

/// Pure for everyone except other Quire instances
fn requested_format(headers: &HeaderMap) -> Format {
    if is_quire_request(headers) {
        Format::Native
    } else {
        Format::Pure
    }
}

/// A visible status authored by the user in the path
async fn authored_status(
    state: &AppState,
    viewer: Option<&User>,
    username: &str,
    id: &str,
) -> Result<Status, AppError> {
    let author = local_user(state, username).await?;
    let status = StatusService::from_state(state)
        .get_visible(viewer, id)
        .await?;
    if status.user_id != author.id {
        return Err(AppError::NotFound);
    }
    Ok(status)
}

/// GET /user/:username
///
/// Content-Type: application/activity+json
async fn actor(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", "/user/:username"])
        .start_timer();

    let user = local_user(&state, &username).await?;
    // Peers need a key to verify what this user signs
    let user = AccountService::from_state(&state).ensure_keys(&user).await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/user/:username", "200"])
        .inc();
    Ok(activity_response(local_actor_document(
        &user,
        &state.config.server.base_url(),
    )))
}

/// GET /user/:username/status/:id
///
/// ActivityPub clients get the activity; anything else gets the JSON view.
async fn status(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Path((username, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", "/user/:username/status/:id"])
        .start_timer();

    let path = format!("/user/{}/status/{}", username, id);
    let id = id.strip_suffix(".json").unwrap_or(&id);
    let status = authored_status(&state, viewer.as_ref(), &username, id).await?;

    if is_api_request(&headers, &path) {
        let activity = StatusService::from_state(&state)
            .to_activity(status, requested_format(&headers))
            .await?;
        return Ok(activity_response(activity));
    }

    Ok(Json(StatusResponse::one(&state.db, status).await?).into_response())
}

/// GET /user/:username/status/:id/replies
async fn replies(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Path((username, id)): Path<(String, String)>,
    Query(params): Query<PageParams>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let status = authored_status(&state, viewer.as_ref(), &username, &id).await?;
    let collection = StatusService::from_state(&state)
        .replies(
            viewer.as_ref(),
            &status,
            params.page.as_deref(),
            requested_format(&headers),
        )
        .await?;
    Ok(activity_response(collection))
}

/// POST /user/:username/inbox
///
/// # Steps
/// 1. Verify HTTP Signature
/// 2. Parse activity
/// 3. Process based on type
async fn inbox(
    State(state): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["POST", "/user/:username/inbox"])
        .start_timer();
    let _fed_timer = FEDERATION_REQUEST_DURATION_SECONDS
        .with_label_values(&["inbound"])
        .start_timer();

    local_user(&state, &username).await?;

    let path = format!("/user/{}/inbox", username);
    InboxProcessor::from_state(&state)
        .receive(&path, &headers, &body)
        .await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/user/:username/inbox", "202"])
        .inc();
    Ok(StatusCode::ACCEPTED)
}

/// POST /inbox
///
/// Shared inbox for all users on this instance.
async fn shared_inbox(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let _fed_timer = FEDERATION_REQUEST_DURATION_SECONDS
        .with_label_values(&["inbound"])
        .start_timer();

    InboxProcessor::from_state(&state)
        .receive("/inbox", &headers, &body)
        .await?;

    Ok(StatusCode::ACCEPTED)
}
