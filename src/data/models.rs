//! Data models
//!
//! Rust structs representing database entities.
//! All models use ULID for IDs and chrono for timestamps.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Privacy
// =============================================================================

/// Audience tier of a status, shelf or import
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Privacy {
    #[default]
    Public,
    Unlisted,
    Followers,
    Direct,
}

impl Privacy {
    pub const ALL: [Privacy; 4] = [
        Privacy::Public,
        Privacy::Unlisted,
        Privacy::Followers,
        Privacy::Direct,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Unlisted => "unlisted",
            Self::Followers => "followers",
            Self::Direct => "direct",
        }
    }
}

impl fmt::Display for Privacy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Privacy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "unlisted" => Ok(Self::Unlisted),
            "followers" => Ok(Self::Followers),
            "direct" => Ok(Self::Direct),
            other => Err(AppError::Validation(format!(
                "privacy must be one of: public, unlisted, followers, direct (got {other})"
            ))),
        }
    }
}

// =============================================================================
// Users
// =============================================================================

/// A local or remote actor
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    /// `localname@domain` for local users, `name@host` for remote users
    pub username: String,
    /// Local users only
    pub localname: Option<String>,
    pub name: Option<String>,
    pub summary: Option<String>,
    pub local: bool,
    /// ActivityPub actor URI
    pub remote_id: String,
    pub inbox: String,
    pub outbox: Option<String>,
    pub shared_inbox: Option<String>,
    pub followers_url: Option<String>,
    /// Remote actor runs Quire and understands the native vocabulary
    pub native_peer: bool,
    pub manually_approves_followers: bool,
    /// May edit instance settings
    pub is_admin: bool,
    pub public_key_pem: Option<String>,
    #[serde(skip_serializing)]
    pub private_key_pem: Option<String>,
    pub server_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Name shown to readers: display name, then localname, then username
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or(self.localname.as_deref())
            .unwrap_or(&self.username)
    }

    /// Followers collection URI
    pub fn followers_uri(&self) -> String {
        self.followers_url
            .clone()
            .unwrap_or_else(|| format!("{}/followers", self.remote_id))
    }

    /// Key ID used in HTTP signatures
    pub fn key_id(&self) -> String {
        format!("{}#main-key", self.remote_id)
    }
}

/// Pending follow awaiting approval
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FollowRequest {
    pub id: String,
    /// Follow activity URI
    pub remote_id: String,
    pub requester_id: String,
    pub target_id: String,
    pub created_at: DateTime<Utc>,
}

/// Peer instance metadata discovered via nodeinfo
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FederatedServer {
    pub id: String,
    pub server_name: String,
    pub application_type: Option<String>,
    pub application_version: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Books
// =============================================================================

/// Whether a book row is an abstract work or a concrete edition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum BookKind {
    Work,
    Edition,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Book {
    pub id: String,
    pub remote_id: String,
    pub kind: BookKind,
    pub title: String,
    pub subtitle: Option<String>,
    /// Comma separated author names
    pub authors: Option<String>,
    pub isbn_10: Option<String>,
    pub isbn_13: Option<String>,
    /// Cover image path relative to the media root
    pub cover: Option<String>,
    pub physical_format: Option<String>,
    pub published_year: Option<i64>,
    pub parent_work_id: Option<String>,
    pub default_edition_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Book {
    pub fn is_work(&self) -> bool {
        self.kind == BookKind::Work
    }

    /// Short format/year description, e.g. "Paperback, 1999"
    pub fn edition_info(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(format) = self.physical_format.as_deref().filter(|f| !f.is_empty()) {
            parts.push(format.to_string());
        }
        if let Some(year) = self.published_year {
            parts.push(year.to_string());
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }

    /// Alt text for the cover image
    pub fn alt_text(&self) -> String {
        match self.edition_info() {
            Some(info) => format!("{} cover ({})", self.title, info),
            None => format!("{} cover", self.title),
        }
    }

    /// HTML link used when describing the book to other software
    pub fn html_link(&self) -> String {
        format!(
            "<a href=\"{}\">\"{}\"</a>",
            self.remote_id,
            html_escape::encode_text(&self.title)
        )
    }
}

// =============================================================================
// Statuses
// =============================================================================

/// Discriminator stored in `statuses.status_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
pub enum StatusType {
    Note,
    GeneratedNote,
    Comment,
    Quotation,
    Review,
    #[serde(rename = "Announce")]
    #[sqlx(rename = "Announce")]
    Boost,
}

impl StatusType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "Note",
            Self::GeneratedNote => "GeneratedNote",
            Self::Comment => "Comment",
            Self::Quotation => "Quotation",
            Self::Review => "Review",
            Self::Boost => "Announce",
        }
    }
}

impl FromStr for StatusType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Note" => Ok(Self::Note),
            "GeneratedNote" => Ok(Self::GeneratedNote),
            "Comment" => Ok(Self::Comment),
            "Quotation" => Ok(Self::Quotation),
            "Review" => Ok(Self::Review),
            "Announce" | "Boost" => Ok(Self::Boost),
            other => Err(AppError::Validation(format!("unknown status type: {other}"))),
        }
    }
}

/// Raw `statuses` row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StatusRow {
    pub id: String,
    pub remote_id: String,
    pub user_id: String,
    pub status_type: StatusType,
    pub content: String,
    pub privacy: Privacy,
    pub sensitive: bool,
    pub content_warning: Option<String>,
    pub reply_parent_id: Option<String>,
    pub book_id: Option<String>,
    pub name: Option<String>,
    pub rating: Option<i64>,
    pub quote: Option<String>,
    pub boosted_status_id: Option<String>,
    pub deleted: bool,
    pub deleted_date: Option<DateTime<Utc>>,
    pub published_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Variant-specific status data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status_type")]
pub enum StatusKind {
    Note,
    /// Posted automatically, e.g. when shelving a book
    GeneratedNote,
    Comment {
        book_id: String,
    },
    Quotation {
        book_id: String,
        quote: String,
    },
    Review {
        book_id: String,
        name: Option<String>,
        rating: Option<u8>,
    },
    #[serde(rename = "Announce")]
    Boost {
        boosted_status_id: String,
    },
}

impl StatusKind {
    pub fn status_type(&self) -> StatusType {
        match self {
            Self::Note => StatusType::Note,
            Self::GeneratedNote => StatusType::GeneratedNote,
            Self::Comment { .. } => StatusType::Comment,
            Self::Quotation { .. } => StatusType::Quotation,
            Self::Review { .. } => StatusType::Review,
            Self::Boost { .. } => StatusType::Boost,
        }
    }

    /// Book the status is about, for book-linked variants
    pub fn book_id(&self) -> Option<&str> {
        match self {
            Self::Comment { book_id }
            | Self::Quotation { book_id, .. }
            | Self::Review { book_id, .. } => Some(book_id),
            _ => None,
        }
    }
}

/// A post: note, comment, quotation, review, generated note or boost
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub id: String,
    pub remote_id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub kind: StatusKind,
    pub content: String,
    pub privacy: Privacy,
    pub sensitive: bool,
    pub content_warning: Option<String>,
    pub reply_parent_id: Option<String>,
    pub deleted: bool,
    pub deleted_date: Option<DateTime<Utc>>,
    pub published_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Status {
    /// Build an unsaved status with defaults (public, not sensitive)
    pub fn new(id: String, remote_id: String, user_id: String, kind: StatusKind) -> Self {
        let now = Utc::now();
        Self {
            id,
            remote_id,
            user_id,
            kind,
            content: String::new(),
            privacy: Privacy::default(),
            sensitive: false,
            content_warning: None,
            reply_parent_id: None,
            deleted: false,
            deleted_date: None,
            published_date: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status_type(&self) -> StatusType {
        self.kind.status_type()
    }

    /// Only public and unlisted statuses may be boosted
    pub fn boostable(&self) -> bool {
        matches!(self.privacy, Privacy::Public | Privacy::Unlisted)
    }

    pub fn book_id(&self) -> Option<&str> {
        self.kind.book_id()
    }

    pub fn boosted_status_id(&self) -> Option<&str> {
        match &self.kind {
            StatusKind::Boost { boosted_status_id } => Some(boosted_status_id),
            _ => None,
        }
    }

    /// Flatten back into row columns for persistence
    pub fn to_row(&self) -> StatusRow {
        let (book_id, name, rating, quote, boosted_status_id) = match &self.kind {
            StatusKind::Note | StatusKind::GeneratedNote => (None, None, None, None, None),
            StatusKind::Comment { book_id } => (Some(book_id.clone()), None, None, None, None),
            StatusKind::Quotation { book_id, quote } => {
                (Some(book_id.clone()), None, None, Some(quote.clone()), None)
            }
            StatusKind::Review {
                book_id,
                name,
                rating,
            } => (
                Some(book_id.clone()),
                name.clone(),
                rating.map(i64::from),
                None,
                None,
            ),
            StatusKind::Boost { boosted_status_id } => {
                (None, None, None, None, Some(boosted_status_id.clone()))
            }
        };

        StatusRow {
            id: self.id.clone(),
            remote_id: self.remote_id.clone(),
            user_id: self.user_id.clone(),
            status_type: self.status_type(),
            content: self.content.clone(),
            privacy: self.privacy,
            sensitive: self.sensitive,
            content_warning: self.content_warning.clone(),
            reply_parent_id: self.reply_parent_id.clone(),
            book_id,
            name,
            rating,
            quote,
            boosted_status_id,
            deleted: self.deleted,
            deleted_date: self.deleted_date,
            published_date: self.published_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl TryFrom<StatusRow> for Status {
    type Error = AppError;

    fn try_from(row: StatusRow) -> Result<Self, Self::Error> {
        let missing = |column: &str| {
            AppError::Internal(anyhow::anyhow!(
                "status {} ({}) is missing {}",
                row.id,
                row.status_type.as_str(),
                column
            ))
        };

        let kind = match row.status_type {
            StatusType::Note => StatusKind::Note,
            StatusType::GeneratedNote => StatusKind::GeneratedNote,
            StatusType::Comment => StatusKind::Comment {
                book_id: row.book_id.clone().ok_or_else(|| missing("book_id"))?,
            },
            StatusType::Quotation => StatusKind::Quotation {
                book_id: row.book_id.clone().ok_or_else(|| missing("book_id"))?,
                quote: row.quote.clone().unwrap_or_default(),
            },
            StatusType::Review => StatusKind::Review {
                book_id: row.book_id.clone().ok_or_else(|| missing("book_id"))?,
                name: row.name.clone(),
                rating: row.rating.and_then(|r| u8::try_from(r).ok()),
            },
            StatusType::Boost => StatusKind::Boost {
                boosted_status_id: row
                    .boosted_status_id
                    .clone()
                    .ok_or_else(|| missing("boosted_status_id"))?,
            },
        };

        Ok(Self {
            id: row.id,
            remote_id: row.remote_id,
            user_id: row.user_id,
            kind,
            content: row.content,
            privacy: row.privacy,
            sensitive: row.sensitive,
            content_warning: row.content_warning,
            reply_parent_id: row.reply_parent_id,
            deleted: row.deleted,
            deleted_date: row.deleted_date,
            published_date: row.published_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Like relationship, one per user and status
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Favorite {
    pub id: String,
    /// Like activity URI
    pub remote_id: String,
    pub user_id: String,
    pub status_id: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Notifications
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Favorite,
    Reply,
    Mention,
    Tag,
    Follow,
    FollowRequest,
    Boost,
    Import,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Favorite => "FAVORITE",
            Self::Reply => "REPLY",
            Self::Mention => "MENTION",
            Self::Tag => "TAG",
            Self::Follow => "FOLLOW",
            Self::FollowRequest => "FOLLOW_REQUEST",
            Self::Boost => "BOOST",
            Self::Import => "IMPORT",
        }
    }
}

impl FromStr for NotificationType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FAVORITE" => Ok(Self::Favorite),
            "REPLY" => Ok(Self::Reply),
            "MENTION" => Ok(Self::Mention),
            "TAG" => Ok(Self::Tag),
            "FOLLOW" => Ok(Self::Follow),
            "FOLLOW_REQUEST" => Ok(Self::FollowRequest),
            "BOOST" => Ok(Self::Boost),
            "IMPORT" => Ok(Self::Import),
            other => Err(AppError::Validation(format!(
                "unknown notification type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: String,
    /// Recipient
    pub user_id: String,
    pub related_user_id: Option<String>,
    pub related_status_id: Option<String>,
    pub related_import_id: Option<String>,
    pub notification_type: NotificationType,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Unread notification for `user_id`
    pub fn new(user_id: &str, notification_type: NotificationType) -> Self {
        Self {
            id: EntityId::new().0,
            user_id: user_id.to_string(),
            related_user_id: None,
            related_status_id: None,
            related_import_id: None,
            notification_type,
            read: false,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// Shelves
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Shelf {
    pub id: String,
    pub remote_id: String,
    pub user_id: String,
    /// Slug, e.g. "to-read"
    pub identifier: String,
    pub name: String,
    pub privacy: Privacy,
    /// Default shelves are not editable
    pub editable: bool,
    pub created_at: DateTime<Utc>,
}

/// Shelves every local user starts with
pub const DEFAULT_SHELVES: [(&str, &str); 3] = [
    ("to-read", "To Read"),
    ("reading", "Currently Reading"),
    ("read", "Read"),
];

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ShelfBook {
    pub id: String,
    pub shelf_id: String,
    pub book_id: String,
    pub added_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Imports
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImportJob {
    pub id: String,
    pub user_id: String,
    /// Origin of the data, e.g. "goodreads"
    pub source: String,
    pub include_reviews: bool,
    pub privacy: Privacy,
    pub complete: bool,
    pub created_at: DateTime<Utc>,
    /// Bumped whenever one of the job's items is processed
    pub updated_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ImportItem {
    pub id: String,
    pub job_id: String,
    /// Position in the source file
    pub item_index: i64,
    /// Source row as JSON
    pub data: String,
    pub book_id: Option<String>,
    pub book_guess_id: Option<String>,
    pub fail_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportItem {
    /// Decode the stored source row
    pub fn fields(&self) -> Result<ImportRow, AppError> {
        serde_json::from_str(&self.data).map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "import item {} has malformed data: {}",
                self.id,
                e
            ))
        })
    }

    /// Neither matched nor failed yet
    pub fn is_pending(&self) -> bool {
        self.book_id.is_none() && self.fail_reason.is_none()
    }
}

/// One row of an import source file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportRow {
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub isbn_13: Option<String>,
    #[serde(default)]
    pub isbn_10: Option<String>,
    /// Source shelf name, e.g. "to-read" or "currently-reading"
    #[serde(default)]
    pub shelf: Option<String>,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub review: Option<String>,
}

// =============================================================================
// Site settings
// =============================================================================

/// Instance-wide settings (singleton row)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SiteSettings {
    pub name: String,
    pub instance_tagline: String,
    pub instance_description: String,
    pub code_of_conduct: String,
    pub privacy_policy: String,
    pub support_link: Option<String>,
    pub support_title: Option<String>,
    pub admin_email: Option<String>,
    pub allow_registration: bool,
    pub allow_invite_requests: bool,
    pub registration_closed_text: String,
    pub updated_at: DateTime<Utc>,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            name: "Quire".to_string(),
            instance_tagline: "Social Reading and Reviewing".to_string(),
            instance_description: "Welcome to Quire!".to_string(),
            code_of_conduct: "Add a code of conduct here.".to_string(),
            privacy_policy: "Add a privacy policy here.".to_string(),
            support_link: None,
            support_title: None,
            admin_email: None,
            allow_registration: true,
            allow_invite_requests: true,
            registration_closed_text: "Registration is closed.".to_string(),
            updated_at: Utc::now(),
        }
    }
}
