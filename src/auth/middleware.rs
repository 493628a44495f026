//! Request authentication
//!
//! Resolves the signed session token on a request to a local `User`.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use axum_extra::extract::CookieJar;

use super::session::verify_session_token;
use crate::AppState;
use crate::data::User;
use crate::error::AppError;

/// Cookie holding the session token
pub const SESSION_COOKIE: &str = "session";

fn extract_token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(ToOwned::to_owned)
        .or_else(|| {
            let jar = CookieJar::from_headers(headers);
            jar.get(SESSION_COOKIE)
                .map(|cookie| cookie.value().to_owned())
        })
}

async fn authenticate_token(token: &str, state: &AppState) -> Result<User, AppError> {
    let session = verify_session_token(token, &state.config.auth.session_secret)?;

    match state.db.get_user(&session.user_id).await? {
        Some(user) if user.local => Ok(user),
        _ => Err(AppError::Unauthorized),
    }
}

/// The signed-in local user; rejects with 401 otherwise
///
/// # Usage
/// ```ignore
/// async fn handler(CurrentUser(user): CurrentUser) -> String {
///     format!("Hello, {}", user.display_name())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<User>().cloned() {
            return Ok(CurrentUser(user));
        }

        let state = AppState::from_ref(state);
        let token = extract_token_from_headers(&parts.headers).ok_or(AppError::Unauthorized)?;
        let user = authenticate_token(&token, &state).await?;
        parts.extensions.insert(user.clone());

        Ok(CurrentUser(user))
    }
}

/// The signed-in user if there is one
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<User>().cloned() {
            return Ok(MaybeUser(Some(user)));
        }

        let app_state = AppState::from_ref(state);
        let user = match extract_token_from_headers(&parts.headers) {
            Some(token) => authenticate_token(&token, &app_state).await.ok(),
            None => None,
        };

        if let Some(user) = &user {
            parts.extensions.insert(user.clone());
        }

        Ok(MaybeUser(user))
    }
}
