//! Inbox processing
//!
//! Verifies signed deliveries and applies incoming activities to local
//! state. Activities about objects we have never seen are dropped; we
//! don't backfill.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde_json::Value;

use super::activities::{PUBLIC, accept, activity_type, reject};
use super::signature::{
    extract_signature_key_id, generate_digest, key_id_matches_actor, verify_signature,
};
use crate::AppState;
use crate::data::{
    Database, EntityId, Favorite, FollowRequest, Notification, NotificationType, Privacy, Status,
    StatusKind, User,
};
use crate::error::AppError;
use crate::metrics::{ACTIVITYPUB_ACTIVITIES_RECEIVED, FEDERATION_REQUESTS_TOTAL};
use crate::service::AccountService;
use crate::tasks::{SharedTaskSink, Task};

/// Object types accepted in a `Create`
const STATUS_TYPES: [&str; 6] = [
    "Note",
    "Article",
    "Comment",
    "Quotation",
    "Review",
    "GeneratedNote",
];

/// Applies activities posted to our inboxes
pub struct InboxProcessor {
    db: Arc<Database>,
    accounts: AccountService,
    tasks: SharedTaskSink,
    base_url: String,
}

impl InboxProcessor {
    pub fn new(
        db: Arc<Database>,
        accounts: AccountService,
        tasks: SharedTaskSink,
        base_url: String,
    ) -> Self {
        Self {
            db,
            accounts,
            tasks,
            base_url,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.db.clone(),
            AccountService::from_state(state),
            state.tasks.clone(),
            state.config.server.base_url(),
        )
    }

    /// Verify a delivery and process it
    ///
    /// `path` is the request path the signature covers.
    ///
    /// # Errors
    /// - `Unauthorized` when the request is unsigned
    /// - `Validation` for malformed bodies or a keyId of another actor
    /// - `InvalidSignature` when verification fails with a fresh key
    pub async fn receive(
        &self,
        path: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<(), AppError> {
        if headers.get("signature").is_none() {
            FEDERATION_REQUESTS_TOTAL
                .with_label_values(&["inbound", "unauthorized"])
                .inc();
            return Err(AppError::Unauthorized);
        }

        let activity: Value = serde_json::from_slice(body)
            .map_err(|e| AppError::Validation(format!("Invalid JSON: {}", e)))?;
        let actor_id = activity
            .get("actor")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Validation("Missing actor field".to_string()))?
            .to_string();

        let key_id = extract_signature_key_id(headers)?;
        if !key_id_matches_actor(&key_id, &actor_id) {
            FEDERATION_REQUESTS_TOTAL
                .with_label_values(&["inbound", "unauthorized"])
                .inc();
            return Err(AppError::Validation(
                "Signature keyId actor mismatch".to_string(),
            ));
        }
        if actor_id.starts_with(&self.base_url) {
            return Err(AppError::Forbidden);
        }

        // A body that doesn't match its digest fails whatever key we hold
        let digest = headers.get("digest").and_then(|d| d.to_str().ok());
        if digest != Some(generate_digest(body).as_str()) {
            FEDERATION_REQUESTS_TOTAL
                .with_label_values(&["inbound", "unauthorized"])
                .inc();
            return Err(AppError::InvalidSignature);
        }

        let actor = self.verified_actor(&actor_id, path, headers, body).await?;

        ACTIVITYPUB_ACTIVITIES_RECEIVED
            .with_label_values(&[activity_type(&activity)])
            .inc();
        self.process(&actor, activity).await?;

        FEDERATION_REQUESTS_TOTAL
            .with_label_values(&["inbound", "success"])
            .inc();
        Ok(())
    }

    /// Resolve the actor and check the signature against its key
    ///
    /// A stored key that fails is refreshed once, in case the actor
    /// rotated it.
    async fn verified_actor(
        &self,
        actor_id: &str,
        path: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<User, AppError> {
        let known = self.db.get_user_by_remote_id(actor_id).await?;
        let fetched_now = known.is_none();
        let actor = match known {
            Some(actor) => actor,
            None => self.accounts.fetch_remote_user(actor_id).await?,
        };

        let check = |actor: &User| match actor.public_key_pem.as_deref() {
            Some(pem) => verify_signature("POST", path, headers, Some(body), pem),
            None => Err(AppError::InvalidSignature),
        };

        match check(&actor) {
            Ok(()) => Ok(actor),
            Err(AppError::InvalidSignature) if !fetched_now => {
                tracing::debug!(actor = %actor.remote_id, "Signature failed, refreshing key");
                let refreshed = self.accounts.fetch_remote_user(actor_id).await?;
                check(&refreshed).map(|()| refreshed)
            }
            Err(error) => {
                FEDERATION_REQUESTS_TOTAL
                    .with_label_values(&["inbound", "unauthorized"])
                    .inc();
                Err(error)
            }
        }
    }

    /// Apply an activity from an already verified actor
    pub async fn process(&self, actor: &User, activity: Value) -> Result<(), AppError> {
        let kind = activity_type(&activity).to_string();
        tracing::debug!(actor = %actor.username, activity_type = %kind, "Processing activity");

        match kind.as_str() {
            "Follow" => self.handle_follow(actor, &activity).await,
            "Accept" => self.handle_accept(actor, &activity).await,
            "Reject" => self.handle_reject(actor, &activity).await,
            "Undo" => self.handle_undo(actor, &activity).await,
            "Like" => self.handle_like(actor, &activity).await,
            "Announce" => self.handle_announce(actor, &activity).await,
            "Create" => self.handle_create(actor, &activity).await,
            "Delete" => self.handle_delete(actor, &activity).await,
            "Block" => self.handle_block(actor, &activity).await,
            other => {
                tracing::info!(actor = %actor.username, activity_type = other, "Ignoring unsupported activity");
                Ok(())
            }
        }
    }

    // =========================================================================
    // Follows
    // =========================================================================

    async fn handle_follow(&self, actor: &User, activity: &Value) -> Result<(), AppError> {
        let follow_id = required_id(activity)?;
        let Some(target) = self.local_user(object_uri(activity)).await? else {
            tracing::debug!(follow = %follow_id, "Follow target is not a local user");
            return Ok(());
        };

        if self.db.is_blocking(&target.id, &actor.id).await? {
            tracing::info!(actor = %actor.username, target = %target.username, "Rejecting follow from blocked user");
            self.deliver(&target, actor, reject(&target.remote_id, activity.clone()));
            return Ok(());
        }

        if self.db.is_following(&actor.id, &target.id).await? {
            self.deliver(&target, actor, accept(&target.remote_id, activity.clone()));
            return Ok(());
        }

        if target.manually_approves_followers {
            if self
                .db
                .get_follow_request(&actor.id, &target.id)
                .await?
                .is_none()
            {
                self.db
                    .insert_follow_request(&FollowRequest {
                        id: EntityId::new().0,
                        remote_id: follow_id.to_string(),
                        requester_id: actor.id.clone(),
                        target_id: target.id.clone(),
                        created_at: Utc::now(),
                    })
                    .await?;
                self.notify(&target, actor, NotificationType::FollowRequest, None)
                    .await?;
            }
            tracing::info!(actor = %actor.username, target = %target.username, "Follow request received");
            return Ok(());
        }

        self.db.add_follow(&actor.id, &target.id).await?;
        self.notify(&target, actor, NotificationType::Follow, None)
            .await?;
        self.deliver(&target, actor, accept(&target.remote_id, activity.clone()));
        tracing::info!(actor = %actor.username, target = %target.username, "Accepted follow");
        Ok(())
    }

    /// Pending request one of our users sent to `actor`
    async fn outgoing_request(
        &self,
        actor: &User,
        activity: &Value,
    ) -> Result<Option<FollowRequest>, AppError> {
        let follow = activity.get("object");
        if let Some(id) = follow.and_then(value_id)
            && let Some(request) = self.db.get_follow_request_by_remote_id(id).await?
        {
            return Ok((request.target_id == actor.id).then_some(request));
        }

        let requester = follow
            .and_then(|f| f.get("actor"))
            .and_then(Value::as_str);
        match self.local_user(requester).await? {
            Some(requester) => self.db.get_follow_request(&requester.id, &actor.id).await,
            None => Ok(None),
        }
    }

    async fn handle_accept(&self, actor: &User, activity: &Value) -> Result<(), AppError> {
        let Some(request) = self.outgoing_request(actor, activity).await? else {
            tracing::debug!(actor = %actor.username, "Accept for unknown follow request");
            return Ok(());
        };

        self.db.add_follow(&request.requester_id, &actor.id).await?;
        self.db.delete_follow_request(&request.id).await?;
        tracing::info!(target = %actor.username, "Follow accepted");
        Ok(())
    }

    async fn handle_reject(&self, actor: &User, activity: &Value) -> Result<(), AppError> {
        let Some(request) = self.outgoing_request(actor, activity).await? else {
            tracing::debug!(actor = %actor.username, "Reject for unknown follow request");
            return Ok(());
        };

        self.db.delete_follow_request(&request.id).await?;
        self.db
            .remove_follow(&request.requester_id, &actor.id)
            .await?;
        tracing::info!(target = %actor.username, "Follow rejected");
        Ok(())
    }

    // =========================================================================
    // Undo
    // =========================================================================

    async fn handle_undo(&self, actor: &User, activity: &Value) -> Result<(), AppError> {
        let object = activity
            .get("object")
            .ok_or_else(|| AppError::Validation("Missing object in Undo".to_string()))?;
        let undone_type = object.get("type").and_then(Value::as_str);

        match undone_type {
            Some("Follow") => {
                let Some(target) = self.local_user(object_uri(object)).await? else {
                    return Ok(());
                };
                self.db.remove_follow(&actor.id, &target.id).await?;
                if let Some(request) = self.db.get_follow_request(&actor.id, &target.id).await? {
                    self.db.delete_follow_request(&request.id).await?;
                }
                tracing::info!(actor = %actor.username, target = %target.username, "Unfollowed");
            }
            Some("Block") => {
                if let Some(target) = self.local_user(object_uri(object)).await? {
                    self.db.remove_block(&actor.id, &target.id).await?;
                }
            }
            // Likes and boosts may be undone by id alone
            Some("Like") | Some("Announce") | None => {
                let Some(undone_id) = value_id(object) else {
                    return Ok(());
                };
                if let Some(favorite) = self.db.get_favorite_by_remote_id(undone_id).await? {
                    if favorite.user_id == actor.id {
                        self.db.delete_favorite(&favorite.id).await?;
                    }
                } else if let Some(boost) = self.db.get_status_by_remote_id(undone_id).await?
                    && boost.user_id == actor.id
                    && boost.boosted_status_id().is_some()
                {
                    self.db.delete_status_row(&boost.id).await?;
                }
            }
            Some(other) => {
                tracing::info!(actor = %actor.username, undone_type = other, "Ignoring unsupported undo");
            }
        }

        Ok(())
    }

    // =========================================================================
    // Statuses
    // =========================================================================

    async fn handle_like(&self, actor: &User, activity: &Value) -> Result<(), AppError> {
        let like_id = required_id(activity)?;
        let Some(status) = self.known_status(object_uri(activity)).await? else {
            return Ok(());
        };

        let favorite = Favorite {
            id: EntityId::new().0,
            remote_id: like_id.to_string(),
            user_id: actor.id.clone(),
            status_id: status.id.clone(),
            created_at: Utc::now(),
        };
        match self.db.insert_favorite(&favorite).await {
            Ok(()) => {}
            Err(AppError::Conflict(_)) => return Ok(()),
            Err(error) => return Err(error),
        }

        if let Some(author) = self.db.get_user(&status.user_id).await?
            && author.local
        {
            self.notify(&author, actor, NotificationType::Favorite, Some(&status.id))
                .await?;
        }
        Ok(())
    }

    async fn handle_announce(&self, actor: &User, activity: &Value) -> Result<(), AppError> {
        let announce_id = required_id(activity)?;
        if self.db.get_status_by_remote_id(announce_id).await?.is_some() {
            return Ok(());
        }
        let Some(boosted) = self.known_status(object_uri(activity)).await? else {
            return Ok(());
        };
        if !boosted.boostable() {
            tracing::debug!(status = %boosted.remote_id, "Ignoring boost of a private status");
            return Ok(());
        }

        let mut boost = Status::new(
            EntityId::new().0,
            announce_id.to_string(),
            actor.id.clone(),
            StatusKind::Boost {
                boosted_status_id: boosted.id.clone(),
            },
        );
        boost.privacy = boosted.privacy;
        boost.published_date = published(activity);
        self.db.insert_status(&boost, &[], &[]).await?;

        if let Some(author) = self.db.get_user(&boosted.user_id).await?
            && author.local
        {
            self.notify(&author, actor, NotificationType::Boost, Some(&boosted.id))
                .await?;
        }
        Ok(())
    }

    async fn handle_create(&self, actor: &User, activity: &Value) -> Result<(), AppError> {
        let Some(object) = activity.get("object").filter(|o| o.is_object()) else {
            tracing::debug!(actor = %actor.username, "Ignoring Create without an embedded object");
            return Ok(());
        };
        let object_type = object.get("type").and_then(Value::as_str).unwrap_or("");
        if !STATUS_TYPES.contains(&object_type) {
            tracing::info!(actor = %actor.username, object_type, "Ignoring unsupported object type");
            return Ok(());
        }

        let remote_id = required_id(object)?;
        if let Some(author) = object.get("attributedTo").and_then(Value::as_str)
            && author != actor.remote_id
        {
            return Err(AppError::Forbidden);
        }
        if self.db.get_status_by_remote_id(remote_id).await?.is_some() {
            return Ok(());
        }

        let book_id = match object.get("inReplyToBook").and_then(Value::as_str) {
            Some(uri) => self.db.get_book_by_remote_id(uri).await?.map(|b| b.id),
            None => None,
        };
        let kind = status_kind(object_type, object, book_id);

        let mut status = Status::new(
            EntityId::new().0,
            remote_id.to_string(),
            actor.id.clone(),
            kind,
        );
        status.content = ammonia::clean(object.get("content").and_then(Value::as_str).unwrap_or(""));
        status.content_warning = object
            .get("summary")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(ammonia::clean);
        status.sensitive = object
            .get("sensitive")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        status.privacy = privacy_from_audience(object, &actor.followers_uri());
        status.published_date = published(object);

        let parent = match object.get("inReplyTo").and_then(Value::as_str) {
            Some(uri) => self.db.get_status_by_remote_id(uri).await?,
            None => None,
        };
        status.reply_parent_id = parent.as_ref().map(|p| p.id.clone());

        let mut mentioned = Vec::new();
        let mut mention_book_ids = Vec::new();
        for tag in object
            .get("tag")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let Some(href) = tag.get("href").and_then(Value::as_str) else {
                continue;
            };
            match tag.get("type").and_then(Value::as_str) {
                Some("Mention") => {
                    if let Some(user) = self.db.get_user_by_remote_id(href).await? {
                        mentioned.push(user);
                    }
                }
                Some("Book") => {
                    if let Some(book) = self.db.get_book_by_remote_id(href).await? {
                        mention_book_ids.push(book.id);
                    }
                }
                _ => {}
            }
        }
        let mention_ids: Vec<String> = mentioned.iter().map(|u| u.id.clone()).collect();

        self.db
            .insert_status(&status, &mention_ids, &mention_book_ids)
            .await?;
        tracing::info!(actor = %actor.username, status = %status.remote_id, "Stored remote status");

        let mut replied_to = None;
        if let Some(parent) = &parent
            && let Some(parent_author) = self.db.get_user(&parent.user_id).await?
            && parent_author.local
            && parent_author.id != actor.id
        {
            self.notify(&parent_author, actor, NotificationType::Reply, Some(&status.id))
                .await?;
            replied_to = Some(parent_author.id);
        }
        for user in mentioned
            .iter()
            .filter(|u| u.local && replied_to.as_deref() != Some(u.id.as_str()))
        {
            self.notify(user, actor, NotificationType::Mention, Some(&status.id))
                .await?;
        }

        Ok(())
    }

    async fn handle_delete(&self, actor: &User, activity: &Value) -> Result<(), AppError> {
        let Some(target) = activity.get("object").and_then(value_id) else {
            return Err(AppError::Validation("Missing object in Delete".to_string()));
        };
        if target == actor.remote_id {
            tracing::info!(actor = %actor.username, "Ignoring account deletion");
            return Ok(());
        }

        let Some(status) = self.db.get_status_by_remote_id(target).await? else {
            return Ok(());
        };
        if status.user_id != actor.id {
            return Err(AppError::Forbidden);
        }
        if status.deleted {
            return Ok(());
        }

        if status.boosted_status_id().is_some() {
            self.db.delete_status_row(&status.id).await?;
        } else {
            self.db.mark_status_deleted(&status.id, Utc::now()).await?;
        }
        tracing::info!(actor = %actor.username, status = %status.remote_id, "Deleted remote status");
        Ok(())
    }

    async fn handle_block(&self, actor: &User, activity: &Value) -> Result<(), AppError> {
        if let Some(target) = self.local_user(object_uri(activity)).await? {
            self.db.add_block(&actor.id, &target.id).await?;
            tracing::info!(actor = %actor.username, target = %target.username, "Blocked by remote user");
        }
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn local_user(&self, uri: Option<&str>) -> Result<Option<User>, AppError> {
        let Some(uri) = uri else {
            return Ok(None);
        };
        Ok(self
            .db
            .get_user_by_remote_id(uri)
            .await?
            .filter(|user| user.local))
    }

    async fn known_status(&self, uri: Option<&str>) -> Result<Option<Status>, AppError> {
        let Some(uri) = uri else {
            return Ok(None);
        };
        let status = self
            .db
            .get_status_by_remote_id(uri)
            .await?
            .filter(|s| !s.deleted);
        if status.is_none() {
            tracing::debug!(object = uri, "Activity refers to an unknown status");
        }
        Ok(status)
    }

    fn deliver(&self, sender: &User, recipient: &User, activity: Value) {
        self.tasks.enqueue(Task::Deliver {
            sender_id: sender.id.clone(),
            inbox: recipient.inbox.clone(),
            activity,
        });
    }

    async fn notify(
        &self,
        recipient: &User,
        actor: &User,
        notification_type: NotificationType,
        status_id: Option<&str>,
    ) -> Result<(), AppError> {
        if self.db.is_blocking(&recipient.id, &actor.id).await? {
            return Ok(());
        }
        let mut notification = Notification::new(&recipient.id, notification_type);
        notification.related_user_id = Some(actor.id.clone());
        notification.related_status_id = status_id.map(str::to_string);
        self.db.insert_notification(&notification).await
    }
}

/// `id` of an object given inline or as a bare URI
fn value_id(value: &Value) -> Option<&str> {
    value
        .as_str()
        .or_else(|| value.get("id").and_then(Value::as_str))
}

fn object_uri(activity: &Value) -> Option<&str> {
    activity.get("object").and_then(value_id)
}

fn required_id(value: &Value) -> Result<&str, AppError> {
    value
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Validation("Missing id".to_string()))
}

fn published(value: &Value) -> DateTime<Utc> {
    value
        .get("published")
        .and_then(Value::as_str)
        .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
        .map(|p| p.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Status variant for an incoming object
///
/// Book-linked types whose book we don't know are stored as notes.
fn status_kind(object_type: &str, object: &Value, book_id: Option<String>) -> StatusKind {
    let text = |field: &str| {
        object
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(ammonia::clean)
    };

    match (object_type, book_id) {
        ("GeneratedNote", _) => StatusKind::GeneratedNote,
        ("Comment", Some(book_id)) => StatusKind::Comment { book_id },
        ("Quotation", Some(book_id)) => StatusKind::Quotation {
            book_id,
            quote: text("quote").unwrap_or_default(),
        },
        ("Review", Some(book_id)) => StatusKind::Review {
            book_id,
            name: text("name"),
            rating: object
                .get("rating")
                .and_then(Value::as_u64)
                .and_then(|r| u8::try_from(r).ok())
                .filter(|r| (1..=5).contains(r)),
        },
        _ => StatusKind::Note,
    }
}

/// Privacy tier implied by an object's addressing
pub fn privacy_from_audience(object: &Value, followers_uri: &str) -> Privacy {
    let addressed = |field: &str, target: &str| match object.get(field) {
        Some(Value::Array(items)) => items.iter().any(|i| i.as_str() == Some(target)),
        Some(Value::String(item)) => item == target,
        _ => false,
    };
    let public_aliases = [PUBLIC, "as:Public", "Public"];

    if public_aliases.iter().any(|p| addressed("to", p)) {
        Privacy::Public
    } else if public_aliases.iter().any(|p| addressed("cc", p)) {
        Privacy::Unlisted
    } else if addressed("to", followers_uri) || addressed("cc", followers_uri) {
        Privacy::Followers
    } else {
        Privacy::Direct
    }
}
