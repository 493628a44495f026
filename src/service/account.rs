//! Account service
//!
//! Local user bootstrap, signing keys, remote actor discovery and the
//! follow/block graph.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::AppState;
use crate::config::{AdminConfig, FederationConfig};
use crate::data::{
    DEFAULT_SHELVES, Database, EntityId, FollowRequest, Notification, NotificationType, Privacy,
    Shelf, User,
};
use crate::error::AppError;
use crate::federation::{
    SigningActor, accept, block, fetch_activity_json, fetch_json, follow, generate_key_pair,
    parse_address, parse_remote_actor, reject, remote_host, resolve_webfinger, undo,
};
use crate::metrics::USERS_TOTAL;
use crate::tasks::{SharedTaskSink, Task};

/// Result of asking to follow someone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowOutcome {
    Following,
    /// Waiting on the target (manual approval or a remote Accept)
    Requested,
}

/// Account service
pub struct AccountService {
    db: Arc<Database>,
    tasks: SharedTaskSink,
    http_client: Arc<reqwest::Client>,
    base_url: String,
    domain: String,
    federation: FederationConfig,
}

impl AccountService {
    /// Create new account service
    pub fn new(
        db: Arc<Database>,
        tasks: SharedTaskSink,
        http_client: Arc<reqwest::Client>,
        base_url: String,
        domain: String,
        federation: FederationConfig,
    ) -> Self {
        Self {
            db,
            tasks,
            http_client,
            base_url,
            domain,
            federation,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.db.clone(),
            state.tasks.clone(),
            state.http_client.clone(),
            state.config.server.base_url(),
            state.config.server.domain.clone(),
            state.config.federation.clone(),
        )
    }

    // =========================================================================
    // Local users
    // =========================================================================

    /// Create a local user with the default shelves
    ///
    /// Keys are generated on first use, not here.
    ///
    /// # Errors
    /// - `Validation` for an empty or malformed localname
    /// - `Conflict` if the localname is taken
    pub async fn create_local_user(
        &self,
        localname: &str,
        display_name: Option<&str>,
        is_admin: bool,
    ) -> Result<User, AppError> {
        let localname = localname.trim();
        if localname.is_empty()
            || !localname
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(AppError::Validation(
                "localname may only contain letters, digits and underscores".to_string(),
            ));
        }

        let now = Utc::now();
        let remote_id = local_remote_id(&self.base_url, localname);
        let user = User {
            id: EntityId::new().0,
            username: format!("{}@{}", localname, self.domain),
            localname: Some(localname.to_string()),
            name: display_name.map(str::to_string),
            summary: None,
            local: true,
            inbox: format!("{}/inbox", remote_id),
            outbox: Some(format!("{}/outbox", remote_id)),
            shared_inbox: Some(format!("{}/inbox", self.base_url)),
            followers_url: Some(format!("{}/followers", remote_id)),
            remote_id,
            native_peer: true,
            manually_approves_followers: false,
            is_admin,
            public_key_pem: None,
            private_key_pem: None,
            server_name: None,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_user(&user).await?;

        for (identifier, name) in DEFAULT_SHELVES {
            let shelf = Shelf {
                id: EntityId::new().0,
                remote_id: format!("{}/books/{}", user.remote_id, identifier),
                user_id: user.id.clone(),
                identifier: identifier.to_string(),
                name: name.to_string(),
                privacy: Privacy::Public,
                editable: false,
                created_at: now,
            };
            self.db.insert_shelf(&shelf).await?;
        }

        USERS_TOTAL.inc();
        tracing::info!(username = %user.username, is_admin, "Created local user");
        Ok(user)
    }

    /// Create the configured admin on first start
    pub async fn ensure_admin_user(&self, admin: &AdminConfig) -> Result<User, AppError> {
        if let Some(user) = self.db.get_user_by_localname(&admin.localname).await? {
            return Ok(user);
        }

        self.create_local_user(&admin.localname, Some(&admin.display_name), true)
            .await
    }

    /// Make sure a local user has a key pair, generating one if needed
    pub async fn ensure_keys(&self, user: &User) -> Result<User, AppError> {
        if !user.local || (user.private_key_pem.is_some() && user.public_key_pem.is_some()) {
            return Ok(user.clone());
        }

        let keys = generate_key_pair(self.federation.key_bits).await?;
        self.db
            .update_user_keys(&user.id, &keys.public_key_pem, &keys.private_key_pem)
            .await?;
        tracing::debug!(username = %user.username, "Generated key pair");

        let mut user = user.clone();
        user.public_key_pem = Some(keys.public_key_pem);
        user.private_key_pem = Some(keys.private_key_pem);
        Ok(user)
    }

    /// Signing identity for outgoing requests on behalf of `user`
    pub async fn signing_actor(&self, user: &User) -> Result<SigningActor, AppError> {
        if !user.local {
            return Err(AppError::Internal(anyhow::anyhow!(
                "cannot sign as remote user {}",
                user.username
            )));
        }

        let user = self.ensure_keys(user).await?;
        let private_key_pem = user
            .private_key_pem
            .clone()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("missing private key")))?;

        Ok(SigningActor {
            actor_uri: user.remote_id.clone(),
            key_id: user.key_id(),
            private_key_pem,
        })
    }

    /// Choose whether new followers need approval
    pub async fn set_manually_approves_followers(
        &self,
        user: &User,
        value: bool,
    ) -> Result<User, AppError> {
        self.db
            .set_manually_approves_followers(&user.id, value)
            .await?;
        let mut user = user.clone();
        user.manually_approves_followers = value;
        Ok(user)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Find a user by localname, then by full username
    ///
    /// A user who blocks the viewer is reported as missing.
    pub async fn get_user_from_username(
        &self,
        viewer: Option<&User>,
        username: &str,
    ) -> Result<User, AppError> {
        let user = match self.db.get_user_by_localname(username).await? {
            Some(user) => user,
            None => self
                .db
                .get_user_by_username(username)
                .await?
                .ok_or(AppError::NotFound)?,
        };

        if let Some(viewer) = viewer
            && self.db.is_blocking(&user.id, &viewer.id).await?
        {
            return Err(AppError::NotFound);
        }

        Ok(user)
    }

    /// Resolve a `user@domain` query to a user, fetching it if unknown
    ///
    /// Returns `None` for malformed queries and for any lookup failure.
    pub async fn handle_remote_webfinger(&self, query: &str) -> Option<User> {
        let query = query.trim();
        let query = query.strip_prefix('@').unwrap_or(query);
        let (user, domain) = parse_address(query)?;
        if user.is_empty() || domain.is_empty() {
            return None;
        }

        match self.db.get_user_by_username(query).await {
            Ok(Some(existing)) => return Some(existing),
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(%error, query, "User lookup failed");
                return None;
            }
        }

        let actor_uri = match resolve_webfinger(
            &self.http_client,
            &self.federation.remote_scheme,
            query,
            self.federation.allow_private_hosts,
        )
        .await
        {
            Ok(uri) => uri,
            Err(error) => {
                tracing::info!(%error, query, "Webfinger lookup failed");
                return None;
            }
        };

        match self.fetch_remote_user(&actor_uri).await {
            Ok(user) => Some(user),
            Err(error) => {
                tracing::info!(%error, actor = %actor_uri, "Remote actor fetch failed");
                None
            }
        }
    }

    /// Known user for an actor URI, fetching and storing it if needed
    pub async fn resolve_remote_actor(&self, actor_uri: &str) -> Result<User, AppError> {
        if let Some(user) = self.db.get_user_by_remote_id(actor_uri).await? {
            return Ok(user);
        }
        self.fetch_remote_user(actor_uri).await
    }

    /// Fetch an actor document, store it and look up its server
    pub async fn fetch_remote_user(&self, actor_uri: &str) -> Result<User, AppError> {
        let document = fetch_activity_json(
            &self.http_client,
            actor_uri,
            self.federation.allow_private_hosts,
        )
        .await?;
        self.store_remote_actor(&document).await
    }

    /// Store an already fetched actor document
    pub async fn store_remote_actor(&self, document: &Value) -> Result<User, AppError> {
        let parsed = parse_remote_actor(document)?;
        if parsed.remote_id.starts_with(&self.base_url) {
            return Err(AppError::Federation(format!(
                "Refusing to store local actor {} as remote",
                parsed.remote_id
            )));
        }

        let user = self.db.upsert_remote_user(&parsed).await?;
        tracing::debug!(username = %user.username, "Stored remote actor");

        self.tasks.enqueue(Task::SetRemoteServer {
            user_id: user.id.clone(),
        });
        Ok(user)
    }

    /// Record which software a remote user's server runs
    ///
    /// Known servers are reused; otherwise nodeinfo is consulted. A failed
    /// lookup still records the server, without application details.
    pub async fn set_remote_server(&self, user_id: &str) -> Result<(), AppError> {
        let user = self.db.get_user(user_id).await?.ok_or(AppError::NotFound)?;
        if user.local {
            return Ok(());
        }

        let allow_private = self.federation.allow_private_hosts;
        let host = remote_host(&user.remote_id, allow_private)?;

        if self.db.get_federated_server(&host).await?.is_none() {
            let (application_type, application_version) =
                match self.fetch_nodeinfo(&user.remote_id).await {
                    Ok(software) => software,
                    Err(error) => {
                        tracing::info!(%error, host = %host, "Nodeinfo lookup failed");
                        (None, None)
                    }
                };
            self.db
                .upsert_federated_server(
                    &host,
                    application_type.as_deref(),
                    application_version.as_deref(),
                )
                .await?;
        }

        self.db.set_user_server(&user.id, &host).await
    }

    /// `(software name, version)` from a server's nodeinfo
    async fn fetch_nodeinfo(
        &self,
        actor_uri: &str,
    ) -> Result<(Option<String>, Option<String>), AppError> {
        let allow_private = self.federation.allow_private_hosts;
        let parsed = url::Url::parse(actor_uri)
            .map_err(|e| AppError::Validation(format!("Invalid actor URL: {}", e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| AppError::Validation("Actor URL has no host".to_string()))?;
        let authority = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let well_known = format!("{}://{}/.well-known/nodeinfo", parsed.scheme(), authority);
        let index = fetch_json(&self.http_client, &well_known, "application/json", allow_private)
            .await?;
        let href = index
            .get("links")
            .and_then(Value::as_array)
            .and_then(|links| {
                links.iter().find_map(|link| {
                    let rel = link.get("rel").and_then(Value::as_str)?;
                    if rel.contains("nodeinfo") {
                        link.get("href").and_then(Value::as_str)
                    } else {
                        None
                    }
                })
            })
            .ok_or_else(|| AppError::Federation("Nodeinfo has no links".to_string()))?;

        let nodeinfo = fetch_json(&self.http_client, href, "application/json", allow_private)
            .await?;
        let software = nodeinfo.get("software");
        let field = |name: &str| {
            software
                .and_then(|s| s.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        Ok((field("name"), field("version")))
    }

    // =========================================================================
    // Follows and blocks
    // =========================================================================

    /// Follow `target` as the local user `follower`
    ///
    /// Local targets are followed at once unless they approve followers
    /// manually. Remote targets get a `Follow` and stay requested until
    /// they answer.
    pub async fn follow(&self, follower: &User, target: &User) -> Result<FollowOutcome, AppError> {
        if follower.id == target.id {
            return Err(AppError::Validation("You cannot follow yourself".to_string()));
        }
        if self.db.is_blocking(&target.id, &follower.id).await?
            || self.db.is_blocking(&follower.id, &target.id).await?
        {
            return Err(AppError::Forbidden);
        }
        if self.db.is_following(&follower.id, &target.id).await? {
            return Ok(FollowOutcome::Following);
        }

        if target.local && !target.manually_approves_followers {
            self.db.add_follow(&follower.id, &target.id).await?;
            self.notify(&target.id, &follower.id, NotificationType::Follow)
                .await?;
            tracing::info!(follower = %follower.username, target = %target.username, "Followed");
            return Ok(FollowOutcome::Following);
        }

        let request = match self.db.get_follow_request(&follower.id, &target.id).await? {
            Some(existing) => existing,
            None => {
                let request = FollowRequest {
                    id: EntityId::new().0,
                    remote_id: follow_remote_id(follower, target),
                    requester_id: follower.id.clone(),
                    target_id: target.id.clone(),
                    created_at: Utc::now(),
                };
                self.db.insert_follow_request(&request).await?;
                if target.local {
                    self.notify(&target.id, &follower.id, NotificationType::FollowRequest)
                        .await?;
                }
                request
            }
        };

        if !target.local {
            self.tasks.enqueue(Task::Deliver {
                sender_id: follower.id.clone(),
                inbox: target.inbox.clone(),
                activity: follow(&request.remote_id, &follower.remote_id, &target.remote_id),
            });
        }

        tracing::info!(follower = %follower.username, target = %target.username, "Follow requested");
        Ok(FollowOutcome::Requested)
    }

    /// Stop following, or withdraw a pending request
    pub async fn unfollow(&self, follower: &User, target: &User) -> Result<(), AppError> {
        let was_following = self.db.remove_follow(&follower.id, &target.id).await?;
        let request = self.db.get_follow_request(&follower.id, &target.id).await?;
        if let Some(request) = &request {
            self.db.delete_follow_request(&request.id).await?;
        }

        if !target.local && (was_following || request.is_some()) {
            let follow_id = request
                .map(|r| r.remote_id)
                .unwrap_or_else(|| follow_remote_id(follower, target));
            self.tasks.enqueue(Task::Deliver {
                sender_id: follower.id.clone(),
                inbox: target.inbox.clone(),
                activity: undo(
                    &follower.remote_id,
                    follow(&follow_id, &follower.remote_id, &target.remote_id),
                ),
            });
        }

        Ok(())
    }

    /// Approve a pending request made to the local user `target`
    pub async fn accept_follow_request(
        &self,
        target: &User,
        requester: &User,
    ) -> Result<(), AppError> {
        let request = self
            .db
            .get_follow_request(&requester.id, &target.id)
            .await?
            .ok_or(AppError::NotFound)?;

        self.db.add_follow(&requester.id, &target.id).await?;
        self.db.delete_follow_request(&request.id).await?;
        self.notify(&target.id, &requester.id, NotificationType::Follow)
            .await?;

        if !requester.local {
            self.tasks.enqueue(Task::Deliver {
                sender_id: target.id.clone(),
                inbox: requester.inbox.clone(),
                activity: accept(
                    &target.remote_id,
                    follow(&request.remote_id, &requester.remote_id, &target.remote_id),
                ),
            });
        }

        Ok(())
    }

    /// Turn down a pending request made to the local user `target`
    pub async fn reject_follow_request(
        &self,
        target: &User,
        requester: &User,
    ) -> Result<(), AppError> {
        let request = self
            .db
            .get_follow_request(&requester.id, &target.id)
            .await?
            .ok_or(AppError::NotFound)?;
        self.db.delete_follow_request(&request.id).await?;

        if !requester.local {
            self.tasks.enqueue(Task::Deliver {
                sender_id: target.id.clone(),
                inbox: requester.inbox.clone(),
                activity: reject(
                    &target.remote_id,
                    follow(&request.remote_id, &requester.remote_id, &target.remote_id),
                ),
            });
        }

        Ok(())
    }

    /// Block `target`, severing follows both ways
    pub async fn block(&self, blocker: &User, target: &User) -> Result<(), AppError> {
        if blocker.id == target.id {
            return Err(AppError::Validation("You cannot block yourself".to_string()));
        }

        let added = self.db.add_block(&blocker.id, &target.id).await?;
        if added && !target.local {
            self.tasks.enqueue(Task::Deliver {
                sender_id: blocker.id.clone(),
                inbox: target.inbox.clone(),
                activity: block(
                    &block_remote_id(blocker, target),
                    &blocker.remote_id,
                    &target.remote_id,
                ),
            });
        }

        Ok(())
    }

    pub async fn unblock(&self, blocker: &User, target: &User) -> Result<(), AppError> {
        let removed = self.db.remove_block(&blocker.id, &target.id).await?;
        if removed && !target.local {
            self.tasks.enqueue(Task::Deliver {
                sender_id: blocker.id.clone(),
                inbox: target.inbox.clone(),
                activity: undo(
                    &blocker.remote_id,
                    block(
                        &block_remote_id(blocker, target),
                        &blocker.remote_id,
                        &target.remote_id,
                    ),
                ),
            });
        }

        Ok(())
    }

    async fn notify(
        &self,
        user_id: &str,
        related_user_id: &str,
        notification_type: NotificationType,
    ) -> Result<(), AppError> {
        let mut notification = Notification::new(user_id, notification_type);
        notification.related_user_id = Some(related_user_id.to_string());
        self.db.insert_notification(&notification).await
    }
}

/// Actor URI of a local user
pub fn local_remote_id(base_url: &str, localname: &str) -> String {
    format!("{}/user/{}", base_url.trim_end_matches('/'), localname)
}

/// Follow activity id; stable so an Undo can name the original
pub fn follow_remote_id(follower: &User, target: &User) -> String {
    format!("{}#follows/{}", follower.remote_id, target.id)
}

fn block_remote_id(blocker: &User, target: &User) -> String {
    format!("{}#blocks/{}", blocker.remote_id, target.id)
}
