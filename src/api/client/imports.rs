//! Import endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Json, Redirect},
};

use crate::AppState;
use crate::api::dto::PageParams;
use crate::auth::CurrentUser;
use crate::data::ImportJob;
use crate::error::AppError;
use crate::service::{ImportService, ImportStatusView, NewImport};

/// POST /api/imports
pub async fn create_import(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(import): Json<NewImport>,
) -> Result<(StatusCode, Json<ImportJob>), AppError> {
    let job = ImportService::from_state(&state)
        .create_job(&user, import)
        .await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/imports/:job_id
pub async fn import_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(job_id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<ImportStatusView>, AppError> {
    let view = ImportService::from_state(&state)
        .import_status(&user, &job_id, params.page.as_deref())
        .await?;
    Ok(Json(view))
}

/// POST /api/imports/:job_id/retry/:item_id
///
/// Redirects to the job's status view.
pub async fn retry_item(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((job_id, item_id)): Path<(String, String)>,
) -> Result<Redirect, AppError> {
    ImportService::from_state(&state)
        .retry_item(&user, &job_id, &item_id)
        .await?;
    Ok(Redirect::to(&format!("/api/imports/{}", job_id)))
}
