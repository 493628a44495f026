//! Client JSON API
//!
//! What a reading client needs: feeds, posting and reacting, shelves,
//! relationships, notifications, imports and site settings.
//! Mounted under `/api`.

use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

pub mod feed;
pub mod imports;
pub mod notifications;
pub mod settings;
pub mod statuses;
pub mod users;

/// Create client API router
///
/// Routes are split into public and authenticated endpoints; the
/// authenticated ones reject anonymous requests with 401 through the
/// `CurrentUser` extractor.
pub fn json_api_router() -> Router<AppState> {
    // Public endpoints (viewer optional)
    let public_routes = Router::new()
        .route("/feed/:tab", get(feed::feed))
        .route("/statuses/:id", get(statuses::get_status))
        .route("/users/:name/shelves", get(users::shelves))
        .route("/webfinger", get(users::webfinger));

    // Authenticated endpoints
    let authenticated_routes = Router::new()
        // Statuses
        .route("/statuses", post(statuses::create_status))
        .route("/statuses/:id/favorite", post(statuses::favorite))
        .route("/statuses/:id/unfavorite", post(statuses::unfavorite))
        .route("/statuses/:id/boost", post(statuses::boost))
        .route("/statuses/:id/unboost", post(statuses::unboost))
        .route("/statuses/:id/delete", post(statuses::delete_status))
        // Shelves
        .route("/shelve", post(feed::shelve))
        .route("/unshelve", post(feed::unshelve))
        // Relationships
        .route("/users/:name/follow", post(users::follow))
        .route("/users/:name/unfollow", post(users::unfollow))
        .route("/users/:name/block", post(users::block))
        .route("/users/:name/unblock", post(users::unblock))
        .route("/users/:name/accept_follow", post(users::accept_follow))
        .route("/users/:name/reject_follow", post(users::reject_follow))
        .route("/account/preferences", post(users::preferences))
        // Notifications
        .route("/notifications", get(notifications::list))
        .route("/notifications/read", post(notifications::mark_read))
        // Imports
        .route("/imports", post(imports::create_import))
        .route("/imports/:job_id", get(imports::import_status))
        .route(
            "/imports/:job_id/retry/:item_id",
            post(imports::retry_item),
        )
        // Site settings (admin)
        .route(
            "/settings/site",
            get(settings::site_settings).post(settings::update_site_settings),
        );

    public_routes.merge(authenticated_routes)
}
