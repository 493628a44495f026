//! Status endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};

use crate::AppState;
use crate::api::dto::StatusResponse;
use crate::auth::{CurrentUser, MaybeUser};
use crate::error::AppError;
use crate::metrics::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};
use crate::service::{NewStatus, StatusService};

/// POST /api/statuses
pub async fn create_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(draft): Json<NewStatus>,
) -> Result<(StatusCode, Json<StatusResponse>), AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["POST", "/api/statuses"])
        .start_timer();

    let status = StatusService::from_state(&state).create(&user, draft).await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["POST", "/api/statuses", "201"])
        .inc();
    Ok((
        StatusCode::CREATED,
        Json(StatusResponse::one(&state.db, status).await?),
    ))
}

/// GET /api/statuses/:id
pub async fn get_status(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let status = StatusService::from_state(&state)
        .get_visible(viewer.as_ref(), &id)
        .await?;
    Ok(Json(StatusResponse::one(&state.db, status).await?))
}

/// POST /api/statuses/:id/favorite
pub async fn favorite(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let service = StatusService::from_state(&state);
    service.favorite(&user, &id).await?;
    let status = service.get_visible(Some(&user), &id).await?;
    Ok(Json(StatusResponse::one(&state.db, status).await?))
}

/// POST /api/statuses/:id/unfavorite
pub async fn unfavorite(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    StatusService::from_state(&state)
        .unfavorite(&user, &id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/statuses/:id/boost
///
/// Responds with the boost status, not the boosted one.
pub async fn boost(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let boost = StatusService::from_state(&state).boost(&user, &id).await?;
    Ok(Json(StatusResponse::one(&state.db, boost).await?))
}

/// POST /api/statuses/:id/unboost
pub async fn unboost(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    StatusService::from_state(&state).unboost(&user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/statuses/:id/delete
pub async fn delete_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let status = StatusService::from_state(&state).delete(&user, &id).await?;
    Ok(Json(StatusResponse::one(&state.db, status).await?))
}
