//! ActivityPub federation module
//!
//! Handles:
//! - Status serialization (native and pure formats)
//! - Activity wrappers
//! - Actor documents
//! - HTTP Signatures
//! - Outbound fetches and delivery
//! - WebFinger
//! - Inbox processing

mod activities;
mod actor;
mod delivery;
mod fetch;
mod inbox;
mod serialize;
mod signature;
mod webfinger;

pub use activities::{
    AS_CONTEXT, PUBLIC, accept, activity_type, block, create, delete, follow, reject, undo,
};
pub use actor::{local_actor_document, parse_remote_actor};
pub use delivery::{
    ActivityDelivery, DeliveryResult, follower_inbox_targets, unique_inbox_targets,
};
pub use fetch::{
    ACTIVITY_JSON, fetch_activity_json, fetch_json, guard_url, remote_host,
};
pub use inbox::InboxProcessor;
pub use serialize::{
    Format, Software, StatusBundle, StatusSerializer, audience, favorite_remote_id,
    favorite_to_activity, review_title,
};
pub use signature::{
    KeyPair, SigningActor, extract_signature_key_id, generate_digest, generate_key_pair,
    key_id_matches_actor, parse_signature_header, sign_request, verify_signature,
};
pub use webfinger::{
    WebFingerLink, WebFingerResponse, generate_webfinger_response, parse_address,
    resolve_webfinger,
};
