//! Feed service
//!
//! Decides who may see what. Single objects are checked with
//! [`object_visible_to_user`]; lists of statuses are resolved into a
//! [`FeedFilter`] and run as one query.

use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::data::{Database, FeedFilter, Privacy, Shelf, Status, StatusType, User};
use crate::error::AppError;
use crate::pagination::{Page, Paginator};

/// Anything with an owner and a privacy tier
pub trait PrivacyControlled: Sync {
    fn owner_id(&self) -> &str;
    fn privacy(&self) -> Privacy;

    /// Id used to look up mentions; only statuses can mention people
    fn mention_target(&self) -> Option<&str> {
        None
    }
}

impl PrivacyControlled for Status {
    fn owner_id(&self) -> &str {
        &self.user_id
    }

    fn privacy(&self) -> Privacy {
        self.privacy
    }

    fn mention_target(&self) -> Option<&str> {
        Some(&self.id)
    }
}

impl PrivacyControlled for Shelf {
    fn owner_id(&self) -> &str {
        &self.user_id
    }

    fn privacy(&self) -> Privacy {
        self.privacy
    }
}

/// Whether `viewer` may see `object`
///
/// 1. never when the owner blocks the viewer
/// 2. always for the owner, and for public or unlisted objects
/// 3. followers-only objects for followers of the owner
/// 4. direct statuses for users they mention
pub async fn object_visible_to_user<T: PrivacyControlled>(
    db: &Database,
    viewer: Option<&User>,
    object: &T,
) -> Result<bool, AppError> {
    let Some(viewer) = viewer else {
        return Ok(matches!(object.privacy(), Privacy::Public | Privacy::Unlisted));
    };

    if db.is_blocking(object.owner_id(), &viewer.id).await? {
        return Ok(false);
    }

    if viewer.id == object.owner_id()
        || matches!(object.privacy(), Privacy::Public | Privacy::Unlisted)
    {
        return Ok(true);
    }

    match object.privacy() {
        Privacy::Followers => db.is_following(&viewer.id, object.owner_id()).await,
        Privacy::Direct => match object.mention_target() {
            Some(status_id) => db.is_user_mentioned(status_id, &viewer.id).await,
            None => Ok(false),
        },
        Privacy::Public | Privacy::Unlisted => Ok(true),
    }
}

/// Parameters of an activity feed query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedQuery {
    pub privacy: Vec<Privacy>,
    pub local_only: bool,
    pub following_only: bool,
    pub status_types: Option<Vec<StatusType>>,
}

/// The named feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedTab {
    Home,
    Local,
    Federated,
    Direct,
}

impl FeedTab {
    pub fn query(&self) -> FeedQuery {
        match self {
            Self::Home => FeedQuery {
                privacy: vec![Privacy::Public, Privacy::Unlisted, Privacy::Followers],
                following_only: true,
                ..Default::default()
            },
            Self::Local => FeedQuery {
                privacy: vec![Privacy::Public, Privacy::Followers],
                local_only: true,
                ..Default::default()
            },
            Self::Federated => FeedQuery {
                privacy: vec![Privacy::Public, Privacy::Followers],
                ..Default::default()
            },
            Self::Direct => FeedQuery {
                privacy: vec![Privacy::Direct],
                ..Default::default()
            },
        }
    }
}

impl FromStr for FeedTab {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "home" => Ok(Self::Home),
            "local" => Ok(Self::Local),
            "federated" => Ok(Self::Federated),
            "direct" => Ok(Self::Direct),
            other => Err(AppError::Validation(format!("unknown feed: {other}"))),
        }
    }
}

/// One page of a feed
#[derive(Debug, Clone)]
pub struct FeedPage {
    pub statuses: Vec<Status>,
    pub page: Page,
}

/// Feed service
pub struct FeedService {
    db: Arc<Database>,
    page_length: usize,
}

impl FeedService {
    pub fn new(db: Arc<Database>, page_length: usize) -> Self {
        Self { db, page_length }
    }

    /// Turn a query into the filter actually run for `viewer`
    ///
    /// Anonymous viewers lose the followers and direct tiers, and have no
    /// one to follow, so a following-only query shows them nothing.
    pub fn resolve_filter(viewer: Option<&User>, query: &FeedQuery) -> FeedFilter {
        let mut privacy: Vec<Privacy> = query.privacy.clone();
        if viewer.is_none() {
            privacy.retain(|p| !matches!(p, Privacy::Followers | Privacy::Direct));
            if query.following_only {
                privacy.clear();
            }
        }

        FeedFilter {
            viewer_id: viewer.map(|v| v.id.clone()),
            privacy,
            local_only: query.local_only,
            following_only: query.following_only,
            status_types: query.status_types.clone(),
        }
    }

    /// Filter for replies under a status: every tier, narrowed to what
    /// `viewer` may see
    pub fn replies_filter(viewer: Option<&User>) -> FeedFilter {
        let query = FeedQuery {
            privacy: vec![
                Privacy::Public,
                Privacy::Unlisted,
                Privacy::Followers,
                Privacy::Direct,
            ],
            ..Default::default()
        };
        Self::resolve_filter(viewer, &query)
    }

    /// Statuses visible to `viewer`, newest first
    pub async fn get_activity_feed(
        &self,
        viewer: Option<&User>,
        query: &FeedQuery,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Status>, AppError> {
        let filter = Self::resolve_filter(viewer, query);
        self.db.fetch_feed(&filter, limit, offset).await
    }

    /// A page of a named feed
    pub async fn feed_page(
        &self,
        viewer: Option<&User>,
        tab: FeedTab,
        raw_page: Option<&str>,
    ) -> Result<FeedPage, AppError> {
        let query = tab.query();
        let filter = Self::resolve_filter(viewer, &query);
        let count = self.db.count_feed(&filter).await?;

        let page = Paginator::new(count.max(0) as usize, self.page_length).get_page(raw_page);
        let statuses = self
            .db
            .fetch_feed(&filter, page.limit, page.offset)
            .await?;

        Ok(FeedPage { statuses, page })
    }

    /// Shelves of `owner` that `viewer` may see
    pub async fn visible_shelves(
        &self,
        viewer: Option<&User>,
        owner: &User,
    ) -> Result<Vec<Shelf>, AppError> {
        let mut visible = Vec::new();
        for shelf in self.db.get_user_shelves(&owner.id).await? {
            if object_visible_to_user(&self.db, viewer, &shelf).await? {
                visible.push(shelf);
            }
        }
        Ok(visible)
    }
}
