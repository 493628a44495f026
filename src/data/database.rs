//! SQLite database operations
//!
//! All database access goes through this module.
//! Uses SQLx with runtime-bound queries against the embedded schema.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect to SQLite database
    ///
    /// Creates the file if missing and runs migrations.
    ///
    /// # Errors
    /// Returns error if connection fails or migrations fail
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        // Create connection string
        let connection_string = format!("sqlite:{}?mode=rwc", path.display());

        // Create connection pool
        let pool = SqlitePool::connect(&connection_string).await?;

        // Run migrations
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    pub(super) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[cfg(test)]
    pub(crate) fn pool_for_test(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Insert a new user (local or remote)
    pub async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (
                id, username, localname, name, summary, local, remote_id, inbox,
                outbox, shared_inbox, followers_url, native_peer,
                manually_approves_followers, is_admin, public_key_pem,
                private_key_pem, server_name, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.localname)
        .bind(&user.name)
        .bind(&user.summary)
        .bind(user.local)
        .bind(&user.remote_id)
        .bind(&user.inbox)
        .bind(&user.outbox)
        .bind(&user.shared_inbox)
        .bind(&user.followers_url)
        .bind(user.native_peer)
        .bind(user.manually_approves_followers)
        .bind(user.is_admin)
        .bind(&user.public_key_pem)
        .bind(&user.private_key_pem)
        .bind(&user.server_name)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::from_integrity(e, "user"))?;

        Ok(())
    }

    /// Insert or refresh a remote actor keyed by its actor URI
    ///
    /// Returns the stored row, whose id is stable across refreshes.
    pub async fn upsert_remote_user(&self, user: &User) -> Result<User, AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (
                id, username, localname, name, summary, local, remote_id, inbox,
                outbox, shared_inbox, followers_url, native_peer,
                manually_approves_followers, is_admin, public_key_pem,
                private_key_pem, server_name, created_at, updated_at
            ) VALUES (?, ?, NULL, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?, 0, ?, NULL, ?, ?, ?)
            ON CONFLICT(remote_id) DO UPDATE SET
                name = excluded.name,
                summary = excluded.summary,
                inbox = excluded.inbox,
                outbox = excluded.outbox,
                shared_inbox = excluded.shared_inbox,
                followers_url = excluded.followers_url,
                native_peer = excluded.native_peer,
                manually_approves_followers = excluded.manually_approves_followers,
                public_key_pem = excluded.public_key_pem,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.name)
        .bind(&user.summary)
        .bind(&user.remote_id)
        .bind(&user.inbox)
        .bind(&user.outbox)
        .bind(&user.shared_inbox)
        .bind(&user.followers_url)
        .bind(user.native_peer)
        .bind(user.manually_approves_followers)
        .bind(&user.public_key_pem)
        .bind(&user.server_name)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::from_integrity(e, "user"))?;

        self.get_user_by_remote_id(&user.remote_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Get user by ID
    pub async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// Get user by full username (`name@domain`), case-insensitive
    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let user =
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE lower(username) = lower(?)")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;

        Ok(user)
    }

    /// Get local user by localname
    pub async fn get_user_by_localname(&self, localname: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE local = 1 AND lower(localname) = lower(?)",
        )
        .bind(localname)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Get user by ActivityPub actor URI
    pub async fn get_user_by_remote_id(&self, remote_id: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE remote_id = ?")
            .bind(remote_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// Get several users at once; unknown ids are skipped
    pub async fn get_users_by_ids(&self, ids: &[String]) -> Result<Vec<User>, AppError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let mut all_users = Vec::new();
        for chunk in ids.chunks(100) {
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let query = format!("SELECT * FROM users WHERE id IN ({})", placeholders);

            let mut query_builder = sqlx::query_as::<_, User>(&query);
            for id in chunk {
                query_builder = query_builder.bind(id);
            }
            all_users.extend(query_builder.fetch_all(&self.pool).await?);
        }

        Ok(all_users)
    }

    /// Store a freshly generated key pair
    pub async fn update_user_keys(
        &self,
        user_id: &str,
        public_key_pem: &str,
        private_key_pem: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE users SET public_key_pem = ?, private_key_pem = ?, updated_at = ? WHERE id = ?",
        )
        .bind(public_key_pem)
        .bind(private_key_pem)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record which server a remote user lives on
    pub async fn set_user_server(&self, user_id: &str, server_name: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET server_name = ? WHERE id = ?")
            .bind(server_name)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn set_manually_approves_followers(
        &self,
        user_id: &str,
        value: bool,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET manually_approves_followers = ?, updated_at = ? WHERE id = ?")
            .bind(value)
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Number of local users
    pub async fn count_local_users(&self) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE local = 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // Follows / Blocks
    // =========================================================================

    /// Add a follow relationship; returns false if it already existed
    pub async fn add_follow(&self, follower_id: &str, followee_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO user_follows (follower_id, followee_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(follower_id)
        .bind(followee_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::from_integrity(e, "follow"))?;

        Ok(result.rows_affected() == 1)
    }

    /// Remove a follow relationship; returns false if none existed
    pub async fn remove_follow(
        &self,
        follower_id: &str,
        followee_id: &str,
    ) -> Result<bool, AppError> {
        let result =
            sqlx::query("DELETE FROM user_follows WHERE follower_id = ? AND followee_id = ?")
                .bind(follower_id)
                .bind(followee_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn is_following(&self, follower_id: &str, followee_id: &str) -> Result<bool, AppError> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM user_follows WHERE follower_id = ? AND followee_id = ?)",
        )
        .bind(follower_id)
        .bind(followee_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists != 0)
    }

    /// Users following `user_id`
    pub async fn get_followers(&self, user_id: &str) -> Result<Vec<User>, AppError> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT u.* FROM users u
            JOIN user_follows f ON f.follower_id = u.id
            WHERE f.followee_id = ?
            ORDER BY f.created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    /// Inboxes of remote followers of `user_id`
    ///
    /// Returns `(inbox, shared_inbox)` pairs. When `native_peer` is set only
    /// followers on matching software are included.
    pub async fn get_remote_follower_inboxes(
        &self,
        user_id: &str,
        native_peer: Option<bool>,
    ) -> Result<Vec<(String, Option<String>)>, AppError> {
        let rows = match native_peer {
            Some(native) => {
                sqlx::query_as::<_, (String, Option<String>)>(
                    r#"
                    SELECT u.inbox, u.shared_inbox FROM users u
                    JOIN user_follows f ON f.follower_id = u.id
                    WHERE f.followee_id = ? AND u.local = 0 AND u.native_peer = ?
                    "#,
                )
                .bind(user_id)
                .bind(native)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, (String, Option<String>)>(
                    r#"
                    SELECT u.inbox, u.shared_inbox FROM users u
                    JOIN user_follows f ON f.follower_id = u.id
                    WHERE f.followee_id = ? AND u.local = 0
                    "#,
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }

    /// Block a user, severing follows in both directions
    pub async fn add_block(&self, blocker_id: &str, blocked_id: &str) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO user_blocks (blocker_id, blocked_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(blocker_id)
        .bind(blocked_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::from_integrity(e, "block"))?;

        sqlx::query(
            r#"
            DELETE FROM user_follows
            WHERE (follower_id = ? AND followee_id = ?) OR (follower_id = ? AND followee_id = ?)
            "#,
        )
        .bind(blocker_id)
        .bind(blocked_id)
        .bind(blocked_id)
        .bind(blocker_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM follow_requests
            WHERE (requester_id = ? AND target_id = ?) OR (requester_id = ? AND target_id = ?)
            "#,
        )
        .bind(blocker_id)
        .bind(blocked_id)
        .bind(blocked_id)
        .bind(blocker_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn remove_block(&self, blocker_id: &str, blocked_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM user_blocks WHERE blocker_id = ? AND blocked_id = ?")
            .bind(blocker_id)
            .bind(blocked_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn is_blocking(&self, blocker_id: &str, blocked_id: &str) -> Result<bool, AppError> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM user_blocks WHERE blocker_id = ? AND blocked_id = ?)",
        )
        .bind(blocker_id)
        .bind(blocked_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists != 0)
    }

    /// IDs of users blocked by `user_id`
    pub async fn get_blocked_ids(&self, user_id: &str) -> Result<Vec<String>, AppError> {
        let ids =
            sqlx::query_scalar::<_, String>("SELECT blocked_id FROM user_blocks WHERE blocker_id = ?")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(ids)
    }

    /// IDs of users who block `user_id`
    pub async fn get_blocker_ids(&self, user_id: &str) -> Result<Vec<String>, AppError> {
        let ids =
            sqlx::query_scalar::<_, String>("SELECT blocker_id FROM user_blocks WHERE blocked_id = ?")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(ids)
    }

    // =========================================================================
    // Follow requests
    // =========================================================================

    pub async fn insert_follow_request(&self, request: &FollowRequest) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO follow_requests (id, remote_id, requester_id, target_id, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&request.id)
        .bind(&request.remote_id)
        .bind(&request.requester_id)
        .bind(&request.target_id)
        .bind(request.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::from_integrity(e, "follow request"))?;

        Ok(())
    }

    pub async fn get_follow_request(
        &self,
        requester_id: &str,
        target_id: &str,
    ) -> Result<Option<FollowRequest>, AppError> {
        let request = sqlx::query_as::<_, FollowRequest>(
            "SELECT * FROM follow_requests WHERE requester_id = ? AND target_id = ?",
        )
        .bind(requester_id)
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(request)
    }

    pub async fn get_follow_request_by_remote_id(
        &self,
        remote_id: &str,
    ) -> Result<Option<FollowRequest>, AppError> {
        let request =
            sqlx::query_as::<_, FollowRequest>("SELECT * FROM follow_requests WHERE remote_id = ?")
                .bind(remote_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(request)
    }

    pub async fn delete_follow_request(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM follow_requests WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // =========================================================================
    // Federated servers
    // =========================================================================

    /// Insert server metadata or refresh the software fields
    pub async fn upsert_federated_server(
        &self,
        server_name: &str,
        application_type: Option<&str>,
        application_version: Option<&str>,
    ) -> Result<FederatedServer, AppError> {
        sqlx::query(
            r#"
            INSERT INTO federated_servers (id, server_name, application_type, application_version, status, created_at)
            VALUES (?, ?, ?, ?, 'federated', ?)
            ON CONFLICT(server_name) DO UPDATE SET
                application_type = excluded.application_type,
                application_version = excluded.application_version
            "#,
        )
        .bind(EntityId::new().0)
        .bind(server_name)
        .bind(application_type)
        .bind(application_version)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.get_federated_server(server_name)
            .await?
            .ok_or(AppError::NotFound)
    }

    pub async fn get_federated_server(
        &self,
        server_name: &str,
    ) -> Result<Option<FederatedServer>, AppError> {
        let server = sqlx::query_as::<_, FederatedServer>(
            "SELECT * FROM federated_servers WHERE server_name = ?",
        )
        .bind(server_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(server)
    }

    // =========================================================================
    // Books
    // =========================================================================

    pub async fn insert_book(&self, book: &Book) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO books (
                id, remote_id, kind, title, subtitle, authors, isbn_10, isbn_13,
                cover, physical_format, published_year, parent_work_id,
                default_edition_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&book.id)
        .bind(&book.remote_id)
        .bind(book.kind)
        .bind(&book.title)
        .bind(&book.subtitle)
        .bind(&book.authors)
        .bind(&book.isbn_10)
        .bind(&book.isbn_13)
        .bind(&book.cover)
        .bind(&book.physical_format)
        .bind(book.published_year)
        .bind(&book.parent_work_id)
        .bind(&book.default_edition_id)
        .bind(book.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::from_integrity(e, "book"))?;

        Ok(())
    }

    pub async fn get_book(&self, id: &str) -> Result<Option<Book>, AppError> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(book)
    }

    pub async fn get_book_by_remote_id(&self, remote_id: &str) -> Result<Option<Book>, AppError> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE remote_id = ?")
            .bind(remote_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(book)
    }

    /// Point a work at its preferred edition
    pub async fn set_default_edition(&self, work_id: &str, edition_id: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE books SET default_edition_id = ? WHERE id = ?")
            .bind(edition_id)
            .bind(work_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Oldest edition of a work
    pub async fn get_first_edition(&self, work_id: &str) -> Result<Option<Book>, AppError> {
        let book = sqlx::query_as::<_, Book>(
            r#"
            SELECT * FROM books
            WHERE parent_work_id = ? AND kind = 'edition'
            ORDER BY created_at, rowid
            LIMIT 1
            "#,
        )
        .bind(work_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(book)
    }

    /// Editions matching either ISBN
    pub async fn find_editions_by_isbn(
        &self,
        isbn_13: Option<&str>,
        isbn_10: Option<&str>,
    ) -> Result<Vec<Book>, AppError> {
        if isbn_13.is_none() && isbn_10.is_none() {
            return Ok(vec![]);
        }

        let books = sqlx::query_as::<_, Book>(
            r#"
            SELECT * FROM books
            WHERE kind = 'edition'
              AND ((? IS NOT NULL AND isbn_13 = ?) OR (? IS NOT NULL AND isbn_10 = ?))
            ORDER BY created_at, rowid
            "#,
        )
        .bind(isbn_13)
        .bind(isbn_13)
        .bind(isbn_10)
        .bind(isbn_10)
        .fetch_all(&self.pool)
        .await?;

        Ok(books)
    }

    /// Editions whose title matches exactly (case-insensitive)
    pub async fn find_editions_by_title(&self, title: &str) -> Result<Vec<Book>, AppError> {
        let books = sqlx::query_as::<_, Book>(
            r#"
            SELECT * FROM books
            WHERE kind = 'edition' AND lower(title) = lower(?)
            ORDER BY created_at, rowid
            "#,
        )
        .bind(title.trim())
        .fetch_all(&self.pool)
        .await?;

        Ok(books)
    }

    /// Editions whose title contains `fragment` (case-insensitive)
    pub async fn search_editions_by_title(
        &self,
        fragment: &str,
        limit: usize,
    ) -> Result<Vec<Book>, AppError> {
        let pattern = format!(
            "%{}%",
            fragment
                .trim()
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_")
        );
        let books = sqlx::query_as::<_, Book>(
            r#"
            SELECT * FROM books
            WHERE kind = 'edition' AND lower(title) LIKE lower(?) ESCAPE '\'
            ORDER BY created_at, rowid
            LIMIT ?
            "#,
        )
        .bind(pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(books)
    }

    // =========================================================================
    // Statuses
    // =========================================================================

    /// Get status by ID
    pub async fn get_status(&self, id: &str) -> Result<Option<Status>, AppError> {
        let row = sqlx::query_as::<_, StatusRow>("SELECT * FROM statuses WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Status::try_from).transpose()
    }

    /// Get status by ActivityPub URI
    pub async fn get_status_by_remote_id(
        &self,
        remote_id: &str,
    ) -> Result<Option<Status>, AppError> {
        let row = sqlx::query_as::<_, StatusRow>("SELECT * FROM statuses WHERE remote_id = ?")
            .bind(remote_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Status::try_from).transpose()
    }

    /// Insert a status with its mention link rows atomically
    pub async fn insert_status(
        &self,
        status: &Status,
        mention_user_ids: &[String],
        mention_book_ids: &[String],
    ) -> Result<(), AppError> {
        let row = status.to_row();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO statuses (
                id, remote_id, user_id, status_type, content, privacy, sensitive,
                content_warning, reply_parent_id, book_id, name, rating, quote,
                boosted_status_id, deleted, deleted_date, published_date,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.remote_id)
        .bind(&row.user_id)
        .bind(row.status_type)
        .bind(&row.content)
        .bind(row.privacy)
        .bind(row.sensitive)
        .bind(&row.content_warning)
        .bind(&row.reply_parent_id)
        .bind(&row.book_id)
        .bind(&row.name)
        .bind(row.rating)
        .bind(&row.quote)
        .bind(&row.boosted_status_id)
        .bind(row.deleted)
        .bind(row.deleted_date)
        .bind(row.published_date)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::from_integrity(e, "status"))?;

        for user_id in mention_user_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO status_mention_users (status_id, user_id) VALUES (?, ?)",
            )
            .bind(&row.id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        for (position, book_id) in mention_book_ids.iter().enumerate() {
            sqlx::query(
                "INSERT OR IGNORE INTO status_mention_books (status_id, book_id, position) VALUES (?, ?, ?)",
            )
            .bind(&row.id)
            .bind(book_id)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    /// Soft-delete: keep the row as a tombstone
    pub async fn mark_status_deleted(
        &self,
        id: &str,
        deleted_date: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE statuses SET deleted = 1, deleted_date = ?, content = '', updated_at = ? WHERE id = ?",
        )
        .bind(deleted_date)
        .bind(deleted_date)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Hard-delete a row (used for undone boosts)
    pub async fn delete_status_row(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM statuses WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Existing boost of `status_id` by `user_id`
    pub async fn find_boost(
        &self,
        user_id: &str,
        status_id: &str,
    ) -> Result<Option<Status>, AppError> {
        let row = sqlx::query_as::<_, StatusRow>(
            r#"
            SELECT * FROM statuses
            WHERE user_id = ? AND boosted_status_id = ? AND status_type = 'Announce'
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(status_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Status::try_from).transpose()
    }

    /// Users mentioned by a status
    pub async fn get_mentioned_users(&self, status_id: &str) -> Result<Vec<User>, AppError> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT u.* FROM users u
            JOIN status_mention_users m ON m.user_id = u.id
            WHERE m.status_id = ?
            ORDER BY u.username
            "#,
        )
        .bind(status_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    /// Books mentioned by a status, in the order they were attached
    pub async fn get_mentioned_books(&self, status_id: &str) -> Result<Vec<Book>, AppError> {
        let books = sqlx::query_as::<_, Book>(
            r#"
            SELECT b.* FROM books b
            JOIN status_mention_books m ON m.book_id = b.id
            WHERE m.status_id = ?
            ORDER BY m.position
            "#,
        )
        .bind(status_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(books)
    }

    pub async fn is_user_mentioned(&self, status_id: &str, user_id: &str) -> Result<bool, AppError> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM status_mention_users WHERE status_id = ? AND user_id = ?)",
        )
        .bind(status_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists != 0)
    }

    /// Number of live, non-boost statuses by local users
    pub async fn count_local_statuses(&self) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM statuses s
            JOIN users u ON u.id = s.user_id
            WHERE u.local = 1 AND s.deleted = 0 AND s.status_type <> 'Announce'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    // =========================================================================
    // Favorites
    // =========================================================================

    /// Insert favorite
    ///
    /// A second favorite of the same status by the same user is a `Conflict`.
    pub async fn insert_favorite(&self, favorite: &Favorite) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO favorites (id, remote_id, user_id, status_id, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&favorite.id)
        .bind(&favorite.remote_id)
        .bind(&favorite.user_id)
        .bind(&favorite.status_id)
        .bind(favorite.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::from_integrity(e, "favorite"))?;

        Ok(())
    }

    pub async fn get_favorite(
        &self,
        user_id: &str,
        status_id: &str,
    ) -> Result<Option<Favorite>, AppError> {
        let favorite = sqlx::query_as::<_, Favorite>(
            "SELECT * FROM favorites WHERE user_id = ? AND status_id = ?",
        )
        .bind(user_id)
        .bind(status_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(favorite)
    }

    pub async fn get_favorite_by_remote_id(
        &self,
        remote_id: &str,
    ) -> Result<Option<Favorite>, AppError> {
        let favorite = sqlx::query_as::<_, Favorite>("SELECT * FROM favorites WHERE remote_id = ?")
            .bind(remote_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(favorite)
    }

    pub async fn delete_favorite(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM favorites WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn count_favorites(&self, status_id: &str) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM favorites WHERE status_id = ?")
            .bind(status_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Insert notification
    pub async fn insert_notification(&self, notification: &Notification) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, user_id, related_user_id, related_status_id, related_import_id,
                notification_type, read, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&notification.id)
        .bind(&notification.user_id)
        .bind(&notification.related_user_id)
        .bind(&notification.related_status_id)
        .bind(&notification.related_import_id)
        .bind(notification.notification_type)
        .bind(notification.read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::from_integrity(e, "notification"))?;

        Ok(())
    }

    /// Get a user's notifications, newest first
    pub async fn get_notifications(
        &self,
        user_id: &str,
        limit: usize,
        unread_only: bool,
    ) -> Result<Vec<Notification>, AppError> {
        let notifications = if unread_only {
            sqlx::query_as::<_, Notification>(
                "SELECT * FROM notifications WHERE user_id = ? AND read = 0 ORDER BY created_at DESC, rowid DESC LIMIT ?",
            )
            .bind(user_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, Notification>(
                "SELECT * FROM notifications WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
            )
            .bind(user_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(notifications)
    }

    /// Mark all of a user's notifications as read
    pub async fn mark_all_notifications_read(&self, user_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query("UPDATE notifications SET read = 1 WHERE user_id = ? AND read = 0")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn count_unread_notifications(&self, user_id: &str) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND read = 0",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    // =========================================================================
    // Shelves
    // =========================================================================

    pub async fn insert_shelf(&self, shelf: &Shelf) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO shelves (id, remote_id, user_id, identifier, name, privacy, editable, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&shelf.id)
        .bind(&shelf.remote_id)
        .bind(&shelf.user_id)
        .bind(&shelf.identifier)
        .bind(&shelf.name)
        .bind(shelf.privacy)
        .bind(shelf.editable)
        .bind(shelf.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::from_integrity(e, "shelf"))?;

        Ok(())
    }

    pub async fn get_shelf_by_identifier(
        &self,
        user_id: &str,
        identifier: &str,
    ) -> Result<Option<Shelf>, AppError> {
        let shelf = sqlx::query_as::<_, Shelf>(
            "SELECT * FROM shelves WHERE user_id = ? AND identifier = ?",
        )
        .bind(user_id)
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        Ok(shelf)
    }

    pub async fn get_user_shelves(&self, user_id: &str) -> Result<Vec<Shelf>, AppError> {
        let shelves = sqlx::query_as::<_, Shelf>(
            "SELECT * FROM shelves WHERE user_id = ? ORDER BY created_at, rowid",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(shelves)
    }

    /// Put a book on a shelf; returns false if it was already there
    pub async fn add_book_to_shelf(
        &self,
        shelf_id: &str,
        book_id: &str,
        added_by: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO shelf_books (id, shelf_id, book_id, added_by, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(EntityId::new().0)
        .bind(shelf_id)
        .bind(book_id)
        .bind(added_by)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn remove_book_from_shelf(
        &self,
        shelf_id: &str,
        book_id: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM shelf_books WHERE shelf_id = ? AND book_id = ?")
            .bind(shelf_id)
            .bind(book_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Take a book off all of a user's non-editable (reading status) shelves
    pub async fn remove_book_from_default_shelves(
        &self,
        user_id: &str,
        book_id: &str,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM shelf_books
            WHERE book_id = ?
              AND shelf_id IN (SELECT id FROM shelves WHERE user_id = ? AND editable = 0)
            "#,
        )
        .bind(book_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Books on a shelf, most recently shelved first
    pub async fn get_shelf_books(&self, shelf_id: &str) -> Result<Vec<Book>, AppError> {
        let books = sqlx::query_as::<_, Book>(
            r#"
            SELECT b.* FROM books b
            JOIN shelf_books sb ON sb.book_id = b.id
            WHERE sb.shelf_id = ?
            ORDER BY sb.created_at DESC, sb.rowid DESC
            "#,
        )
        .bind(shelf_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(books)
    }

    // =========================================================================
    // Imports
    // =========================================================================

    /// Insert a job and all its items atomically
    pub async fn insert_import_job(
        &self,
        job: &ImportJob,
        items: &[ImportItem],
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO import_jobs (id, user_id, source, include_reviews, privacy, complete, created_at, updated_date)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.user_id)
        .bind(&job.source)
        .bind(job.include_reviews)
        .bind(job.privacy)
        .bind(job.complete)
        .bind(job.created_at)
        .bind(job.updated_date)
        .execute(&mut *tx)
        .await?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO import_items (
                    id, job_id, item_index, data, book_id, book_guess_id, fail_reason,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&item.id)
            .bind(&item.job_id)
            .bind(item.item_index)
            .bind(&item.data)
            .bind(&item.book_id)
            .bind(&item.book_guess_id)
            .bind(&item.fail_reason)
            .bind(item.created_at)
            .bind(item.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::from_integrity(e, "import item"))?;
        }

        tx.commit().await?;

        Ok(())
    }

    pub async fn get_import_job(&self, id: &str) -> Result<Option<ImportJob>, AppError> {
        let job = sqlx::query_as::<_, ImportJob>("SELECT * FROM import_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    pub async fn get_import_item(&self, id: &str) -> Result<Option<ImportItem>, AppError> {
        let item = sqlx::query_as::<_, ImportItem>("SELECT * FROM import_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(item)
    }

    /// Items of a job ordered by their source index
    pub async fn get_import_items(
        &self,
        job_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ImportItem>, AppError> {
        let items = sqlx::query_as::<_, ImportItem>(
            "SELECT * FROM import_items WHERE job_id = ? ORDER BY item_index LIMIT ? OFFSET ?",
        )
        .bind(job_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    pub async fn count_import_items(&self, job_id: &str) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM import_items WHERE job_id = ?")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Items neither matched nor failed
    pub async fn count_pending_import_items(&self, job_id: &str) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM import_items WHERE job_id = ? AND book_id IS NULL AND fail_reason IS NULL",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Failed items that carry a guess awaiting confirmation
    pub async fn count_manual_review_items(&self, job_id: &str) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM import_items
            WHERE job_id = ? AND fail_reason IS NOT NULL
              AND book_guess_id IS NOT NULL AND book_id IS NULL
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Failed items with nothing to suggest
    pub async fn count_failed_import_items(&self, job_id: &str) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM import_items
            WHERE job_id = ? AND fail_reason IS NOT NULL AND book_guess_id IS NULL
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Store the outcome of processing one item and bump the job's clock
    pub async fn update_import_item_result(
        &self,
        item: &ImportItem,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE import_items
            SET book_id = ?, book_guess_id = ?, fail_reason = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&item.book_id)
        .bind(&item.book_guess_id)
        .bind(&item.fail_reason)
        .bind(now)
        .bind(&item.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE import_jobs SET updated_date = ? WHERE id = ?")
            .bind(now)
            .bind(&item.job_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Flag a job complete; returns false if it already was
    pub async fn mark_import_job_complete(&self, job_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE import_jobs SET complete = 1 WHERE id = ? AND complete = 0")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    #[cfg(test)]
    pub(crate) async fn set_import_job_updated_for_test(
        &self,
        job_id: &str,
        updated_date: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE import_jobs SET updated_date = ? WHERE id = ?")
            .bind(updated_date)
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // =========================================================================
    // Site settings
    // =========================================================================

    /// Get the settings row, creating it with defaults on first use
    pub async fn get_site_settings(&self) -> Result<SiteSettings, AppError> {
        let defaults = SiteSettings::default();
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO site_settings (
                id, name, instance_tagline, instance_description, code_of_conduct,
                privacy_policy, support_link, support_title, admin_email,
                allow_registration, allow_invite_requests, registration_closed_text,
                updated_at
            ) VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&defaults.name)
        .bind(&defaults.instance_tagline)
        .bind(&defaults.instance_description)
        .bind(&defaults.code_of_conduct)
        .bind(&defaults.privacy_policy)
        .bind(&defaults.support_link)
        .bind(&defaults.support_title)
        .bind(&defaults.admin_email)
        .bind(defaults.allow_registration)
        .bind(defaults.allow_invite_requests)
        .bind(&defaults.registration_closed_text)
        .bind(defaults.updated_at)
        .execute(&self.pool)
        .await?;

        let settings = sqlx::query_as::<_, SiteSettings>(
            r#"
            SELECT name, instance_tagline, instance_description, code_of_conduct,
                   privacy_policy, support_link, support_title, admin_email,
                   allow_registration, allow_invite_requests, registration_closed_text,
                   updated_at
            FROM site_settings WHERE id = 1
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(settings)
    }

    /// Overwrite the settings row
    pub async fn update_site_settings(&self, settings: &SiteSettings) -> Result<(), AppError> {
        // Make sure the row exists before updating it
        self.get_site_settings().await?;

        sqlx::query(
            r#"
            UPDATE site_settings SET
                name = ?, instance_tagline = ?, instance_description = ?,
                code_of_conduct = ?, privacy_policy = ?, support_link = ?,
                support_title = ?, admin_email = ?, allow_registration = ?,
                allow_invite_requests = ?, registration_closed_text = ?, updated_at = ?
            WHERE id = 1
            "#,
        )
        .bind(&settings.name)
        .bind(&settings.instance_tagline)
        .bind(&settings.instance_description)
        .bind(&settings.code_of_conduct)
        .bind(&settings.privacy_policy)
        .bind(&settings.support_link)
        .bind(&settings.support_title)
        .bind(&settings.admin_email)
        .bind(settings.allow_registration)
        .bind(settings.allow_invite_requests)
        .bind(&settings.registration_closed_text)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
