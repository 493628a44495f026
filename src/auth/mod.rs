//! Authentication
//!
//! Handles:
//! - Session tokens
//! - Current-user extractors
//!
//! Token issuance happens outside this server.

mod middleware;
pub mod session;

pub use middleware::{CurrentUser, MaybeUser, SESSION_COOKIE};
pub use session::{Session, create_session_token, verify_session_token};
