//! Status service
//!
//! Handles status operations including create, delete, favorite and
//! boost, reading-status notes and shelving. Every change by a local user
//! is broadcast through the task queue.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use super::feed::{FeedService, object_visible_to_user};
use super::helpers::get_edition;
use crate::AppState;
use crate::data::{
    Book, Database, EntityId, Favorite, Notification, NotificationType, Privacy, Status,
    StatusKind, StatusType, User,
};
use crate::error::AppError;
use crate::federation::{
    Format, Software, StatusBundle, StatusSerializer, create, delete, favorite_remote_id,
    favorite_to_activity, undo,
};
use crate::metrics::POSTS_TOTAL;
use crate::pagination::Paginator;
use crate::tasks::{SharedTaskSink, Task};

/// Input for a new status
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewStatus {
    pub status_type: Option<StatusType>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub book_id: Option<String>,
    #[serde(default)]
    pub quote: Option<String>,
    /// Review title
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub privacy: Privacy,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub content_warning: Option<String>,
    #[serde(default)]
    pub reply_parent_id: Option<String>,
    /// Localnames or `user@domain` usernames
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub mention_book_ids: Vec<String>,
}

/// Status service
pub struct StatusService {
    db: Arc<Database>,
    tasks: SharedTaskSink,
    serializer: StatusSerializer,
    page_length: usize,
}

impl StatusService {
    /// Create new status service
    pub fn new(
        db: Arc<Database>,
        tasks: SharedTaskSink,
        base_url: String,
        page_length: usize,
    ) -> Self {
        Self {
            db,
            tasks,
            serializer: StatusSerializer::new(base_url, page_length),
            page_length,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.db.clone(),
            state.tasks.clone(),
            state.config.server.base_url(),
            state.config.instance.page_length,
        )
    }

    // =========================================================================
    // Lookup and serialization
    // =========================================================================

    /// Live status that `viewer` may see
    pub async fn get_visible(
        &self,
        viewer: Option<&User>,
        status_id: &str,
    ) -> Result<Status, AppError> {
        let status = self
            .db
            .get_status(status_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if status.deleted || !object_visible_to_user(&self.db, viewer, &status).await? {
            return Err(AppError::NotFound);
        }

        Ok(status)
    }

    /// Gather everything the serializer needs for `status`
    pub async fn load_bundle(&self, status: Status) -> Result<StatusBundle, AppError> {
        let author = self
            .db
            .get_user(&status.user_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let book = match status.book_id() {
            Some(book_id) => self.db.get_book(book_id).await?,
            None => None,
        };

        let reply_parent_remote_id = match status.reply_parent_id.as_deref() {
            Some(parent_id) => self.db.get_status(parent_id).await?.map(|p| p.remote_id),
            None => None,
        };

        let boosted_remote_id = match status.boosted_status_id() {
            Some(boosted_id) => self.db.get_status(boosted_id).await?.map(|b| b.remote_id),
            None => None,
        };

        Ok(StatusBundle {
            mention_users: self.db.get_mentioned_users(&status.id).await?,
            mention_books: self.db.get_mentioned_books(&status.id).await?,
            reply_count: self
                .db
                .count_replies(&status.id, &FeedService::replies_filter(None))
                .await?,
            author,
            book,
            reply_parent_remote_id,
            boosted_remote_id,
            status,
        })
    }

    /// ActivityPub JSON for a status
    pub async fn to_activity(&self, status: Status, format: Format) -> Result<Value, AppError> {
        let bundle = self.load_bundle(status).await?;
        Ok(self.serializer.to_activity(&bundle, format))
    }

    /// Replies collection, or one page of it when `raw_page` is given
    ///
    /// Only replies `viewer` may see are counted and listed.
    pub async fn replies(
        &self,
        viewer: Option<&User>,
        status: &Status,
        raw_page: Option<&str>,
        format: Format,
    ) -> Result<Value, AppError> {
        let filter = FeedService::replies_filter(viewer);
        let total = self.db.count_replies(&status.id, &filter).await?;
        let Some(raw_page) = raw_page else {
            return Ok(self.serializer.replies_collection(status, total));
        };

        let page = Paginator::new(total.max(0) as usize, self.page_length).get_page(Some(raw_page));
        let replies = self
            .db
            .get_replies(&status.id, &filter, page.limit, page.offset)
            .await?;

        let mut items = Vec::with_capacity(replies.len());
        for reply in replies {
            items.push(self.to_activity(reply, format).await?);
        }

        Ok(self
            .serializer
            .replies_page(status, page.number, page.num_pages, items))
    }

    // =========================================================================
    // CRUD Operations
    // =========================================================================

    /// Create a status as a local user
    ///
    /// # Side Effects
    /// - Inserts the status with its mentions
    /// - Notifies the local author of the reply parent (REPLY) and local
    ///   mentioned users (MENTION)
    /// - Broadcasts the pure version, then the native version
    pub async fn create(&self, author: &User, draft: NewStatus) -> Result<Status, AppError> {
        if !author.local {
            return Err(AppError::Forbidden);
        }

        let status_type = draft
            .status_type
            .ok_or_else(|| AppError::Validation("status_type is required".to_string()))?;
        let kind = self.build_kind(status_type, &draft).await?;

        let content = draft.content.trim();
        if matches!(kind, StatusKind::Note | StatusKind::Comment { .. }) && content.is_empty() {
            return Err(AppError::Validation("content is required".to_string()));
        }
        let content = match &kind {
            StatusKind::GeneratedNote => html_escape::encode_text(content).into_owned(),
            _ if content.is_empty() => String::new(),
            _ => format!("<p>{}</p>", html_escape::encode_text(content)),
        };

        let reply_parent = match draft.reply_parent_id.as_deref() {
            Some(parent_id) => Some(self.get_visible(Some(author), parent_id).await?),
            None => None,
        };

        let mut mention_users = self.resolve_mentions(&draft.mentions).await?;
        if let Some(parent) = &reply_parent
            && !mention_users.iter().any(|u| u.id == parent.user_id)
            && let Some(parent_author) = self.db.get_user(&parent.user_id).await?
        {
            mention_users.push(parent_author);
        }

        let mut mention_book_ids = Vec::new();
        if let (StatusKind::GeneratedNote, Some(book_id)) = (&kind, draft.book_id.as_deref()) {
            mention_book_ids.push(self.require_book(book_id).await?.id);
        }
        for book_id in &draft.mention_book_ids {
            let book = self.require_book(book_id).await?;
            if !mention_book_ids.contains(&book.id) {
                mention_book_ids.push(book.id);
            }
        }

        let id = EntityId::new().0;
        let mut status = Status::new(
            id.clone(),
            status_remote_id(author, &id),
            author.id.clone(),
            kind,
        );
        status.content = content;
        status.privacy = draft.privacy;
        status.sensitive = draft.sensitive;
        status.content_warning = draft
            .content_warning
            .map(|cw| cw.trim().to_string())
            .filter(|cw| !cw.is_empty());
        status.reply_parent_id = reply_parent.as_ref().map(|p| p.id.clone());

        let mention_ids: Vec<String> = mention_users.iter().map(|u| u.id.clone()).collect();
        self.db
            .insert_status(&status, &mention_ids, &mention_book_ids)
            .await?;
        POSTS_TOTAL.inc();
        tracing::info!(
            status_id = %status.id,
            status_type = status.status_type().as_str(),
            author = %author.username,
            "Created status"
        );

        let mut notified = Vec::new();
        if let Some(parent) = &reply_parent
            && parent.user_id != author.id
            && self.is_local_user(&parent.user_id, &mention_users).await?
        {
            self.notify(&parent.user_id, author, &status, NotificationType::Reply)
                .await?;
            notified.push(parent.user_id.clone());
        }
        for user in mention_users.iter().filter(|u| u.local && u.id != author.id) {
            if !notified.contains(&user.id) {
                self.notify(&user.id, author, &status, NotificationType::Mention)
                    .await?;
            }
        }

        let bundle = self.load_bundle(status.clone()).await?;
        for software in [Software::Other, Software::Quire] {
            let object = self.serializer.to_activity(&bundle, software.format());
            self.tasks.enqueue(Task::Broadcast {
                sender_id: author.id.clone(),
                activity: create(&author.remote_id, object),
                software: Some(software),
                privacy: status.privacy,
                mention_ids: mention_ids.clone(),
            });
        }

        Ok(status)
    }

    async fn build_kind(
        &self,
        status_type: StatusType,
        draft: &NewStatus,
    ) -> Result<StatusKind, AppError> {
        if let Some(rating) = draft.rating
            && !(1..=5).contains(&rating)
        {
            return Err(AppError::Validation(
                "rating must be between 1 and 5".to_string(),
            ));
        }

        Ok(match status_type {
            StatusType::Note => StatusKind::Note,
            StatusType::GeneratedNote => StatusKind::GeneratedNote,
            StatusType::Comment => StatusKind::Comment {
                book_id: self.required_book(status_type, draft).await?,
            },
            StatusType::Quotation => {
                let quote = draft
                    .quote
                    .as_deref()
                    .map(str::trim)
                    .filter(|q| !q.is_empty())
                    .ok_or_else(|| AppError::Validation("quote is required".to_string()))?;
                StatusKind::Quotation {
                    book_id: self.required_book(status_type, draft).await?,
                    quote: format!("<p>{}</p>", html_escape::encode_text(quote)),
                }
            }
            StatusType::Review => StatusKind::Review {
                book_id: self.required_book(status_type, draft).await?,
                name: draft
                    .name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string),
                rating: draft.rating,
            },
            StatusType::Boost => {
                return Err(AppError::Validation(
                    "boosts are created by boosting a status".to_string(),
                ));
            }
        })
    }

    async fn required_book(
        &self,
        status_type: StatusType,
        draft: &NewStatus,
    ) -> Result<String, AppError> {
        let book_id = draft.book_id.as_deref().ok_or_else(|| {
            AppError::Validation(format!("{} requires a book", status_type.as_str()))
        })?;
        Ok(self.require_book(book_id).await?.id)
    }

    async fn require_book(&self, book_id: &str) -> Result<Book, AppError> {
        self.db
            .get_book(book_id)
            .await?
            .ok_or_else(|| AppError::Validation(format!("unknown book: {book_id}")))
    }

    /// Look up mentioned users; names that match no one are skipped
    async fn resolve_mentions(&self, names: &[String]) -> Result<Vec<User>, AppError> {
        let mut users: Vec<User> = Vec::new();
        for name in names {
            let name = name.trim().trim_start_matches('@');
            let user = match self.db.get_user_by_localname(name).await? {
                Some(user) => Some(user),
                None => self.db.get_user_by_username(name).await?,
            };
            match user {
                Some(user) if !users.iter().any(|u| u.id == user.id) => users.push(user),
                Some(_) => {}
                None => tracing::debug!(mention = name, "Skipping unknown mention"),
            }
        }
        Ok(users)
    }

    async fn is_local_user(&self, user_id: &str, known: &[User]) -> Result<bool, AppError> {
        if let Some(user) = known.iter().find(|u| u.id == user_id) {
            return Ok(user.local);
        }
        Ok(self.db.get_user(user_id).await?.is_some_and(|u| u.local))
    }

    /// Soft-delete a status and broadcast its tombstone
    pub async fn delete(&self, user: &User, status_id: &str) -> Result<Status, AppError> {
        let status = self
            .db
            .get_status(status_id)
            .await?
            .filter(|s| !s.deleted)
            .ok_or(AppError::NotFound)?;

        if status.user_id != user.id {
            return Err(AppError::Forbidden);
        }
        if status.boosted_status_id().is_some() {
            return Err(AppError::Validation(
                "boosts are removed by unboosting".to_string(),
            ));
        }

        let mention_ids: Vec<String> = self
            .db
            .get_mentioned_users(&status.id)
            .await?
            .into_iter()
            .map(|u| u.id)
            .collect();

        self.db.mark_status_deleted(&status.id, Utc::now()).await?;
        let deleted = self
            .db
            .get_status(&status.id)
            .await?
            .ok_or(AppError::NotFound)?;
        POSTS_TOTAL.dec();
        tracing::info!(status_id = %deleted.id, "Deleted status");

        let tombstone = self.to_activity(deleted.clone(), Format::Native).await?;
        self.tasks.enqueue(Task::Broadcast {
            sender_id: user.id.clone(),
            activity: delete(&user.remote_id, tombstone),
            software: None,
            privacy: deleted.privacy,
            mention_ids,
        });

        Ok(deleted)
    }

    // =========================================================================
    // Favorites
    // =========================================================================

    /// Favorite a status
    ///
    /// # Errors
    /// `Conflict` if the user already favorited it
    pub async fn favorite(&self, user: &User, status_id: &str) -> Result<Favorite, AppError> {
        let status = self.get_visible(Some(user), status_id).await?;

        let id = EntityId::new().0;
        let favorite = Favorite {
            remote_id: favorite_remote_id(user, &id),
            id,
            user_id: user.id.clone(),
            status_id: status.id.clone(),
            created_at: Utc::now(),
        };
        self.db.insert_favorite(&favorite).await?;

        if status.user_id != user.id && self.is_local_user(&status.user_id, &[]).await? {
            self.notify(&status.user_id, user, &status, NotificationType::Favorite)
                .await?;
        }

        self.tasks.enqueue(Task::Broadcast {
            sender_id: user.id.clone(),
            activity: favorite_to_activity(&favorite, user, &status.remote_id),
            software: None,
            privacy: Privacy::Direct,
            mention_ids: vec![status.user_id.clone()],
        });

        Ok(favorite)
    }

    pub async fn unfavorite(&self, user: &User, status_id: &str) -> Result<(), AppError> {
        let favorite = self
            .db
            .get_favorite(&user.id, status_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let status = self
            .db
            .get_status(status_id)
            .await?
            .ok_or(AppError::NotFound)?;

        self.db.delete_favorite(&favorite.id).await?;

        self.tasks.enqueue(Task::Broadcast {
            sender_id: user.id.clone(),
            activity: undo(
                &user.remote_id,
                favorite_to_activity(&favorite, user, &status.remote_id),
            ),
            software: None,
            privacy: Privacy::Direct,
            mention_ids: vec![status.user_id.clone()],
        });

        Ok(())
    }

    // =========================================================================
    // Boosts
    // =========================================================================

    /// Boost a public or unlisted status
    ///
    /// Boosting twice returns the existing boost.
    pub async fn boost(&self, user: &User, status_id: &str) -> Result<Status, AppError> {
        let status = self.get_visible(Some(user), status_id).await?;
        if status.boosted_status_id().is_some() {
            return Err(AppError::Validation("boosts cannot be boosted".to_string()));
        }
        if !status.boostable() {
            return Err(AppError::Validation(
                "only public and unlisted statuses can be boosted".to_string(),
            ));
        }
        if let Some(existing) = self.db.find_boost(&user.id, &status.id).await? {
            return Ok(existing);
        }

        let id = EntityId::new().0;
        let mut boost = Status::new(
            id.clone(),
            status_remote_id(user, &id),
            user.id.clone(),
            StatusKind::Boost {
                boosted_status_id: status.id.clone(),
            },
        );
        boost.privacy = status.privacy;
        self.db.insert_status(&boost, &[], &[]).await?;

        if status.user_id != user.id && self.is_local_user(&status.user_id, &[]).await? {
            self.notify(&status.user_id, user, &status, NotificationType::Boost)
                .await?;
        }

        let announce = self.to_activity(boost.clone(), Format::Native).await?;
        self.tasks.enqueue(Task::Broadcast {
            sender_id: user.id.clone(),
            activity: announce,
            software: None,
            privacy: boost.privacy,
            mention_ids: vec![status.user_id.clone()],
        });

        Ok(boost)
    }

    pub async fn unboost(&self, user: &User, status_id: &str) -> Result<(), AppError> {
        let boost = self
            .db
            .find_boost(&user.id, status_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let boosted_author = self
            .db
            .get_status(status_id)
            .await?
            .map(|s| s.user_id)
            .unwrap_or_default();

        let privacy = boost.privacy;
        let announce = self.to_activity(boost.clone(), Format::Native).await?;
        self.db.delete_status_row(&boost.id).await?;

        self.tasks.enqueue(Task::Broadcast {
            sender_id: user.id.clone(),
            activity: undo(&user.remote_id, announce),
            software: None,
            privacy,
            mention_ids: vec![boosted_author],
        });

        Ok(())
    }

    // =========================================================================
    // Shelves
    // =========================================================================

    /// Post the note that goes with moving a book to a reading-status shelf
    ///
    /// Shelves other than to-read, reading and read post nothing.
    pub async fn handle_reading_status(
        &self,
        user: &User,
        shelf_identifier: &str,
        book: &Book,
        privacy: Privacy,
    ) -> Result<Option<Status>, AppError> {
        let message = match shelf_identifier {
            "to-read" => "wants to read",
            "reading" => "started reading",
            "read" => "finished reading",
            _ => return Ok(None),
        };

        let status = self
            .create(
                user,
                NewStatus {
                    status_type: Some(StatusType::GeneratedNote),
                    content: message.to_string(),
                    book_id: Some(book.id.clone()),
                    privacy,
                    ..Default::default()
                },
            )
            .await?;

        Ok(Some(status))
    }

    /// Put a book on one of the user's shelves
    ///
    /// A book sits on at most one reading-status shelf, so moving it to one
    /// takes it off the others and posts a reading-status note.
    pub async fn shelve(
        &self,
        user: &User,
        book_id: &str,
        shelf_identifier: &str,
        privacy: Privacy,
    ) -> Result<Option<Status>, AppError> {
        let book = get_edition(&self.db, book_id).await?;
        let shelf = self
            .db
            .get_shelf_by_identifier(&user.id, shelf_identifier)
            .await?
            .ok_or(AppError::NotFound)?;

        if !shelf.editable {
            self.db
                .remove_book_from_default_shelves(&user.id, &book.id)
                .await?;
        }
        let added = self
            .db
            .add_book_to_shelf(&shelf.id, &book.id, &user.id)
            .await?;

        if added && !shelf.editable {
            return self
                .handle_reading_status(user, &shelf.identifier, &book, privacy)
                .await;
        }

        Ok(None)
    }

    pub async fn unshelve(
        &self,
        user: &User,
        book_id: &str,
        shelf_identifier: &str,
    ) -> Result<(), AppError> {
        let shelf = self
            .db
            .get_shelf_by_identifier(&user.id, shelf_identifier)
            .await?
            .ok_or(AppError::NotFound)?;

        if !self.db.remove_book_from_shelf(&shelf.id, book_id).await? {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn notify(
        &self,
        recipient_id: &str,
        actor: &User,
        status: &Status,
        notification_type: NotificationType,
    ) -> Result<(), AppError> {
        let mut notification = Notification::new(recipient_id, notification_type);
        notification.related_user_id = Some(actor.id.clone());
        notification.related_status_id = Some(status.id.clone());
        self.db.insert_notification(&notification).await
    }
}

/// Remote id of a status by a local user
pub fn status_remote_id(author: &User, status_id: &str) -> String {
    format!("{}/status/{}", author.remote_id, status_id)
}
