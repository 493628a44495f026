//! Actor documents
//!
//! Serializes local users as `Person` actors and turns fetched remote actor
//! JSON into `User` rows.

use chrono::Utc;
use serde_json::{Value, json};

use super::activities::AS_CONTEXT;
use crate::data::{EntityId, User};
use crate::error::AppError;

const SECURITY_CONTEXT: &str = "https://w3id.org/security/v1";

/// `Person` document for a local user
///
/// `quireUser` tells peers running Quire that this actor understands the
/// native vocabulary.
pub fn local_actor_document(user: &User, base_url: &str) -> Value {
    let actor_url = &user.remote_id;
    let localname = user.localname.as_deref().unwrap_or(&user.username);

    json!({
        "@context": [AS_CONTEXT, SECURITY_CONTEXT],
        "id": actor_url,
        "type": "Person",
        "preferredUsername": localname,
        "name": user.display_name(),
        "summary": user.summary.clone().unwrap_or_default(),
        "url": actor_url,
        "inbox": user.inbox,
        "outbox": user.outbox.clone().unwrap_or_else(|| format!("{}/outbox", actor_url)),
        "followers": user.followers_uri(),
        "following": format!("{}/following", actor_url),
        "manuallyApprovesFollowers": user.manually_approves_followers,
        "quireUser": true,
        "endpoints": {
            "sharedInbox": format!("{}/inbox", base_url.trim_end_matches('/'))
        },
        "publicKey": {
            "id": user.key_id(),
            "owner": actor_url,
            "publicKeyPem": user.public_key_pem
        }
    })
}

/// Build an unsaved remote `User` from a fetched actor document
///
/// The id is freshly generated; `Database::upsert_remote_user` keeps the
/// existing id when the actor is already known.
pub fn parse_remote_actor(actor: &Value) -> Result<User, AppError> {
    let field = |name: &str| actor.get(name).and_then(Value::as_str);

    let remote_id = field("id")
        .ok_or_else(|| AppError::Federation("Actor is missing id".to_string()))?
        .to_string();
    let inbox = field("inbox")
        .ok_or_else(|| AppError::Federation("Actor is missing inbox".to_string()))?
        .to_string();
    let preferred_username = field("preferredUsername")
        .ok_or_else(|| AppError::Federation("Actor is missing preferredUsername".to_string()))?;

    let host = url::Url::parse(&remote_id)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .ok_or_else(|| AppError::Federation(format!("Actor id is not a URL: {}", remote_id)))?;

    let shared_inbox = actor
        .get("endpoints")
        .and_then(|e| e.get("sharedInbox"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let public_key_pem = actor
        .get("publicKey")
        .and_then(|k| k.get("publicKeyPem"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let now = Utc::now();
    Ok(User {
        id: EntityId::new().0,
        username: format!("{}@{}", preferred_username, host),
        localname: None,
        name: field("name").map(str::to_string),
        summary: field("summary").map(|s| ammonia::clean(s)),
        local: false,
        remote_id,
        inbox,
        outbox: field("outbox").map(str::to_string),
        shared_inbox,
        followers_url: field("followers").map(str::to_string),
        native_peer: actor
            .get("quireUser")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        manually_approves_followers: actor
            .get("manuallyApprovesFollowers")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        is_admin: false,
        public_key_pem,
        private_key_pem: None,
        server_name: Some(host),
        created_at: now,
        updated_at: now,
    })
}
