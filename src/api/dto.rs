//! JSON API response DTOs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::{Book, Database, Privacy, Shelf, Status, User};
use crate::error::AppError;
use crate::pagination::Page;
use crate::service::FeedTab;

/// Public view of a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub local: bool,
    pub remote_id: String,
    pub manually_approves_followers: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            display_name: user.display_name().to_string(),
            local: user.local,
            remote_id: user.remote_id.clone(),
            manually_approves_followers: user.manually_approves_followers,
            created_at: user.created_at,
        }
    }
}

/// A status with its author
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: Status,
    pub author: Option<UserResponse>,
}

impl StatusResponse {
    /// Attach authors to a list of statuses with one lookup
    pub async fn many(db: &Database, statuses: Vec<Status>) -> Result<Vec<Self>, AppError> {
        let mut ids: Vec<String> = statuses.iter().map(|s| s.user_id.clone()).collect();
        ids.sort();
        ids.dedup();
        let authors: HashMap<String, User> = db
            .get_users_by_ids(&ids)
            .await?
            .into_iter()
            .map(|u| (u.id.clone(), u))
            .collect();

        Ok(statuses
            .into_iter()
            .map(|status| Self {
                author: authors.get(&status.user_id).map(UserResponse::from),
                status,
            })
            .collect())
    }

    pub async fn one(db: &Database, status: Status) -> Result<Self, AppError> {
        let author = db.get_user(&status.user_id).await?;
        Ok(Self {
            author: author.as_ref().map(UserResponse::from),
            status,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedResponse {
    pub tab: FeedTab,
    pub statuses: Vec<StatusResponse>,
    pub page: Page,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShelfResponse {
    #[serde(flatten)]
    pub shelf: Shelf,
    pub books: Vec<Book>,
}

/// Result of a follow/block style action
#[derive(Debug, Clone, Serialize)]
pub struct RelationshipResponse {
    pub target: UserResponse,
    pub following: bool,
    pub requested: bool,
    pub blocking: bool,
}

/// Body of `POST /api/shelve`
#[derive(Debug, Clone, Deserialize)]
pub struct ShelveRequest {
    pub book_id: String,
    pub shelf: String,
    #[serde(default)]
    pub privacy: Privacy,
}

/// Body of `POST /api/unshelve`
#[derive(Debug, Clone, Deserialize)]
pub struct UnshelveRequest {
    pub book_id: String,
    pub shelf: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShelveResponse {
    /// Reading-status note posted by the move, if any
    pub status: Option<Status>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreferencesRequest {
    pub manually_approves_followers: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationParams {
    #[serde(default)]
    pub unread: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebfingerParams {
    pub q: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadResponse {
    pub marked_read: u64,
}
