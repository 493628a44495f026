//! Site settings endpoints (admin only)

use axum::{
    Form,
    extract::State,
    response::{Json, Redirect},
};

use crate::AppState;
use crate::auth::MaybeUser;
use crate::data::SiteSettings;
use crate::error::AppError;
use crate::service::{SiteService, SiteSettingsForm};

/// GET /api/settings/site
pub async fn site_settings(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
) -> Result<Json<SiteSettings>, AppError> {
    let settings = SiteService::new(state.db.clone())
        .get(viewer.as_ref())
        .await?;
    Ok(Json(settings))
}

/// POST /api/settings/site
///
/// Form-encoded; redirects back to the settings view once saved.
pub async fn update_site_settings(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Form(form): Form<SiteSettingsForm>,
) -> Result<Redirect, AppError> {
    SiteService::new(state.db.clone())
        .update(viewer.as_ref(), form)
        .await?;
    Ok(Redirect::to("/api/settings/site"))
}
