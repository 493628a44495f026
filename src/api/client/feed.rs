//! Feed and shelf endpoints

use axum::{
    extract::{Path, Query, State},
    response::Json,
};

use crate::AppState;
use crate::api::dto::{
    FeedResponse, PageParams, ShelveRequest, ShelveResponse, StatusResponse, UnshelveRequest,
};
use crate::auth::{CurrentUser, MaybeUser};
use crate::error::AppError;
use crate::metrics::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};
use crate::service::{FeedService, FeedTab, StatusService};

/// GET /api/feed/:tab
///
/// Tabs: home, local, federated, direct.
pub async fn feed(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Path(tab): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<FeedResponse>, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", "/api/feed/:tab"])
        .start_timer();

    let tab: FeedTab = tab.parse()?;
    let page = FeedService::new(state.db.clone(), state.config.instance.page_length)
        .feed_page(viewer.as_ref(), tab, params.page.as_deref())
        .await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/api/feed/:tab", "200"])
        .inc();

    Ok(Json(FeedResponse {
        tab,
        statuses: StatusResponse::many(&state.db, page.statuses).await?,
        page: page.page,
    }))
}

/// POST /api/shelve
pub async fn shelve(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<ShelveRequest>,
) -> Result<Json<ShelveResponse>, AppError> {
    let status = StatusService::from_state(&state)
        .shelve(&user, &req.book_id, &req.shelf, req.privacy)
        .await?;
    Ok(Json(ShelveResponse { status }))
}

/// POST /api/unshelve
pub async fn unshelve(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<UnshelveRequest>,
) -> Result<Json<ShelveResponse>, AppError> {
    StatusService::from_state(&state)
        .unshelve(&user, &req.book_id, &req.shelf)
        .await?;
    Ok(Json(ShelveResponse { status: None }))
}
