//! Activity feed SQL
//!
//! The visibility policy (which tiers an anonymous viewer may request,
//! what each named feed means) lives in `service::feed`; this module only
//! turns a resolved [`FeedFilter`] into SQL.

use sqlx::{QueryBuilder, Sqlite};

use super::database::Database;
use super::models::{Privacy, Status, StatusRow, StatusType};
use crate::error::AppError;

/// Resolved feed constraints for one query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedFilter {
    /// `None` for anonymous viewers
    pub viewer_id: Option<String>,
    /// Privacy tiers to include
    pub privacy: Vec<Privacy>,
    pub local_only: bool,
    pub following_only: bool,
    /// Restrict to these status types
    pub status_types: Option<Vec<StatusType>>,
}

/// Append the per-status predicates for alias `s` (status) and `u` (author)
fn push_conditions(qb: &mut QueryBuilder<'static, Sqlite>, filter: &FeedFilter, s: &str, u: &str) {
    qb.push(format!(" AND {s}.deleted = 0"));

    if filter.privacy.is_empty() {
        qb.push(" AND 0");
    } else {
        qb.push(format!(" AND {s}.privacy IN ("));
        let mut separated = qb.separated(", ");
        for privacy in &filter.privacy {
            separated.push_bind(*privacy);
        }
        separated.push_unseparated(")");
    }

    if let Some(types) = &filter.status_types {
        if types.is_empty() {
            qb.push(" AND 0");
        } else {
            qb.push(format!(" AND {s}.status_type IN ("));
            let mut separated = qb.separated(", ");
            for status_type in types {
                separated.push_bind(*status_type);
            }
            separated.push_unseparated(")");
        }
    }

    if filter.local_only {
        qb.push(format!(" AND {u}.local = 1"));
    }

    let Some(viewer) = filter.viewer_id.as_deref() else {
        return;
    };

    if filter.following_only {
        push_follows_or_own_or_mentions(qb, viewer, s);
    } else if filter.privacy.contains(&Privacy::Followers) {
        qb.push(format!(" AND NOT ({s}.privacy = 'followers' AND NOT ("));
        push_followed_author(qb, viewer, s);
        qb.push(format!(" OR {s}.user_id = "));
        qb.push_bind(viewer.to_string());
        qb.push("))");
    }

    if filter.privacy.contains(&Privacy::Direct) {
        qb.push(format!(" AND NOT ({s}.privacy = 'direct' AND NOT ({s}.user_id = "));
        qb.push_bind(viewer.to_string());
        qb.push(" OR ");
        push_mentions_viewer(qb, viewer, s);
        qb.push("))");
    }

    // Blocks apply in both directions
    qb.push(format!(
        " AND {s}.user_id NOT IN (SELECT blocked_id FROM user_blocks WHERE blocker_id = "
    ));
    qb.push_bind(viewer.to_string());
    qb.push(format!(
        ") AND {s}.user_id NOT IN (SELECT blocker_id FROM user_blocks WHERE blocked_id = "
    ));
    qb.push_bind(viewer.to_string());
    qb.push(")");
}

fn push_followed_author(qb: &mut QueryBuilder<'static, Sqlite>, viewer: &str, s: &str) {
    qb.push(format!(
        "{s}.user_id IN (SELECT followee_id FROM user_follows WHERE follower_id = "
    ));
    qb.push_bind(viewer.to_string());
    qb.push(")");
}

fn push_mentions_viewer(qb: &mut QueryBuilder<'static, Sqlite>, viewer: &str, s: &str) {
    qb.push(format!(
        "EXISTS (SELECT 1 FROM status_mention_users mu WHERE mu.status_id = {s}.id AND mu.user_id = "
    ));
    qb.push_bind(viewer.to_string());
    qb.push(")");
}

fn push_follows_or_own_or_mentions(qb: &mut QueryBuilder<'static, Sqlite>, viewer: &str, s: &str) {
    qb.push(" AND (");
    push_followed_author(qb, viewer, s);
    qb.push(format!(" OR {s}.user_id = "));
    qb.push_bind(viewer.to_string());
    qb.push(" OR ");
    push_mentions_viewer(qb, viewer, s);
    qb.push(")");
}

/// `SELECT {select}` over statuses matching `filter`, minus statuses that
/// another status in the same result boosts
fn feed_query(select: &str, filter: &FeedFilter) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new(format!(
        "SELECT {select} FROM statuses s JOIN users u ON u.id = s.user_id WHERE 1 = 1"
    ));
    push_conditions(&mut qb, filter, "s", "u");

    qb.push(
        " AND s.id NOT IN (SELECT b.boosted_status_id FROM statuses b \
         JOIN users bu ON bu.id = b.user_id WHERE b.boosted_status_id IS NOT NULL",
    );
    push_conditions(&mut qb, filter, "b", "bu");
    qb.push(")");

    qb
}

/// `SELECT {select}` over direct replies to `parent_id` matching `filter`
fn replies_query(
    select: &str,
    parent_id: &str,
    filter: &FeedFilter,
) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new(format!(
        "SELECT {select} FROM statuses s JOIN users u ON u.id = s.user_id WHERE s.reply_parent_id = "
    ));
    qb.push_bind(parent_id.to_string());
    push_conditions(&mut qb, filter, "s", "u");
    qb
}

impl Database {
    /// Direct replies visible under `filter`, oldest first
    pub async fn get_replies(
        &self,
        parent_id: &str,
        filter: &FeedFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Status>, AppError> {
        let mut qb = replies_query("s.*", parent_id, filter);
        qb.push(" ORDER BY s.published_date ASC, s.rowid ASC LIMIT ");
        qb.push_bind(limit as i64);
        qb.push(" OFFSET ");
        qb.push_bind(offset as i64);

        let rows = qb
            .build_query_as::<StatusRow>()
            .fetch_all(self.pool())
            .await?;

        rows.into_iter().map(Status::try_from).collect()
    }

    pub async fn count_replies(&self, parent_id: &str, filter: &FeedFilter) -> Result<i64, AppError> {
        let mut qb = replies_query("COUNT(*)", parent_id, filter);
        let count = qb.build_query_scalar::<i64>().fetch_one(self.pool()).await?;

        Ok(count)
    }

    /// One page of a feed, newest first
    pub async fn fetch_feed(
        &self,
        filter: &FeedFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Status>, AppError> {
        let mut qb = feed_query("s.*", filter);
        qb.push(" ORDER BY s.published_date DESC, s.rowid DESC LIMIT ");
        qb.push_bind(limit as i64);
        qb.push(" OFFSET ");
        qb.push_bind(offset as i64);

        let rows = qb
            .build_query_as::<StatusRow>()
            .fetch_all(self.pool())
            .await?;

        rows.into_iter().map(Status::try_from).collect()
    }

    /// Total size of a feed
    pub async fn count_feed(&self, filter: &FeedFilter) -> Result<i64, AppError> {
        let mut qb = feed_query("COUNT(*)", filter);
        let count = qb.build_query_scalar::<i64>().fetch_one(self.pool()).await?;

        Ok(count)
    }
}
