//! Notification endpoints

use axum::{
    extract::{Query, State},
    response::Json,
};

use crate::AppState;
use crate::api::dto::{NotificationParams, ReadResponse};
use crate::auth::CurrentUser;
use crate::data::Notification;
use crate::error::AppError;

const DEFAULT_LIMIT: usize = 40;
const MAX_LIMIT: usize = 200;

/// GET /api/notifications
///
/// Query: ?unread=true&limit=N
pub async fn list(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<NotificationParams>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let notifications = state
        .db
        .get_notifications(&user.id, limit, params.unread)
        .await?;
    Ok(Json(notifications))
}

/// POST /api/notifications/read
pub async fn mark_read(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ReadResponse>, AppError> {
    let marked_read = state.db.mark_all_notifications_read(&user.id).await?;
    Ok(Json(ReadResponse { marked_read }))
}
