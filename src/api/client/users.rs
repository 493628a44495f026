//! User, relationship and shelf endpoints

use axum::{
    extract::{Path, Query, State},
    response::Json,
};

use crate::AppState;
use crate::api::dto::{
    PreferencesRequest, RelationshipResponse, ShelfResponse, UserResponse, WebfingerParams,
};
use crate::auth::{CurrentUser, MaybeUser};
use crate::data::User;
use crate::error::AppError;
use crate::service::{AccountService, FeedService};

async fn relationship(
    state: &AppState,
    viewer: &User,
    target: &User,
) -> Result<Json<RelationshipResponse>, AppError> {
    Ok(Json(RelationshipResponse {
        target: UserResponse::from(target),
        following: state.db.is_following(&viewer.id, &target.id).await?,
        requested: state
            .db
            .get_follow_request(&viewer.id, &target.id)
            .await?
            .is_some(),
        blocking: state.db.is_blocking(&viewer.id, &target.id).await?,
    }))
}

/// Look up the user named in the path as seen by `viewer`
async fn target(
    accounts: &AccountService,
    viewer: &User,
    name: &str,
) -> Result<User, AppError> {
    accounts.get_user_from_username(Some(viewer), name).await
}

/// POST /api/users/:name/follow
pub async fn follow(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(name): Path<String>,
) -> Result<Json<RelationshipResponse>, AppError> {
    let accounts = AccountService::from_state(&state);
    let target = target(&accounts, &user, &name).await?;
    let outcome = accounts.follow(&user, &target).await?;
    tracing::debug!(follower = %user.username, target = %target.username, ?outcome, "Follow");
    relationship(&state, &user, &target).await
}

/// POST /api/users/:name/unfollow
pub async fn unfollow(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(name): Path<String>,
) -> Result<Json<RelationshipResponse>, AppError> {
    let accounts = AccountService::from_state(&state);
    let target = target(&accounts, &user, &name).await?;
    accounts.unfollow(&user, &target).await?;
    relationship(&state, &user, &target).await
}

/// POST /api/users/:name/block
pub async fn block(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(name): Path<String>,
) -> Result<Json<RelationshipResponse>, AppError> {
    let accounts = AccountService::from_state(&state);
    let target = target(&accounts, &user, &name).await?;
    accounts.block(&user, &target).await?;
    relationship(&state, &user, &target).await
}

/// POST /api/users/:name/unblock
pub async fn unblock(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(name): Path<String>,
) -> Result<Json<RelationshipResponse>, AppError> {
    let accounts = AccountService::from_state(&state);
    let target = target(&accounts, &user, &name).await?;
    accounts.unblock(&user, &target).await?;
    relationship(&state, &user, &target).await
}

/// POST /api/users/:name/accept_follow
///
/// `name` is the requester; the signed-in user is the one being followed.
pub async fn accept_follow(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(name): Path<String>,
) -> Result<Json<RelationshipResponse>, AppError> {
    let accounts = AccountService::from_state(&state);
    let requester = target(&accounts, &user, &name).await?;
    accounts.accept_follow_request(&user, &requester).await?;
    relationship(&state, &user, &requester).await
}

/// POST /api/users/:name/reject_follow
pub async fn reject_follow(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(name): Path<String>,
) -> Result<Json<RelationshipResponse>, AppError> {
    let accounts = AccountService::from_state(&state);
    let requester = target(&accounts, &user, &name).await?;
    accounts.reject_follow_request(&user, &requester).await?;
    relationship(&state, &user, &requester).await
}

/// POST /api/account/preferences
pub async fn preferences(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<PreferencesRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = AccountService::from_state(&state)
        .set_manually_approves_followers(&user, req.manually_approves_followers)
        .await?;
    Ok(Json(UserResponse::from(&user)))
}

/// GET /api/users/:name/shelves
///
/// Shelves the viewer may see, with their books.
pub async fn shelves(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Path(name): Path<String>,
) -> Result<Json<Vec<ShelfResponse>>, AppError> {
    let owner = AccountService::from_state(&state)
        .get_user_from_username(viewer.as_ref(), &name)
        .await?;
    let shelves = FeedService::new(state.db.clone(), state.config.instance.page_length)
        .visible_shelves(viewer.as_ref(), &owner)
        .await?;

    let mut response = Vec::with_capacity(shelves.len());
    for shelf in shelves {
        let books = state.db.get_shelf_books(&shelf.id).await?;
        response.push(ShelfResponse { shelf, books });
    }
    Ok(Json(response))
}

/// GET /api/webfinger?q=user@domain
///
/// Resolves a remote user, fetching and storing them if unknown.
pub async fn webfinger(
    State(state): State<AppState>,
    Query(params): Query<WebfingerParams>,
) -> Result<Json<UserResponse>, AppError> {
    let user = AccountService::from_state(&state)
        .handle_remote_webfinger(&params.q)
        .await
        .ok_or(AppError::NotFound)?;
    Ok(Json(UserResponse::from(&user)))
}
