//! Service layer
//!
//! Contains business logic separated from HTTP handlers.
//! Services orchestrate database, task queue and federation operations.

mod account;
mod feed;
pub mod helpers;
mod import;
mod site;
mod status;

pub use account::{AccountService, FollowOutcome, follow_remote_id, local_remote_id};
pub use feed::{
    FeedPage, FeedQuery, FeedService, FeedTab, PrivacyControlled, object_visible_to_user,
};
pub use import::{ImportService, ImportStatusView, NewImport, map_shelf};
pub use site::{SiteService, SiteSettingsForm};
pub use status::{NewStatus, StatusService, status_remote_id};
