//! ActivityPub serialization of statuses
//!
//! Every status has two wire forms. The native form keeps Quire's own
//! object types (`Review`, `Comment`, `Quotation`, `GeneratedNote`) and
//! their book fields, and is sent to peers running Quire. The pure form
//! folds those fields into plain `Note`/`Article` content so any other
//! ActivityPub server can display it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::activities::{AS_CONTEXT, PUBLIC};
use crate::data::{Book, Favorite, Privacy, Status, StatusKind, User};
use crate::pagination::Paginator;

/// Pure serialization attaches at most this many mentioned-book covers
const MAX_MENTIONED_COVERS: usize = 4;

/// Which software a payload is meant for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Software {
    /// Peers running Quire: native vocabulary
    Quire,
    /// Everything else: pure vocabulary
    Other,
}

impl Software {
    pub fn format(&self) -> Format {
        match self {
            Self::Quire => Format::Native,
            Self::Other => Format::Pure,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quire => "quire",
            Self::Other => "other",
        }
    }
}

/// Wire format of a serialized status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Native,
    Pure,
}

/// A status with everything needed to serialize it
#[derive(Debug, Clone)]
pub struct StatusBundle {
    pub status: Status,
    pub author: User,
    /// Book of a Comment/Quotation/Review
    pub book: Option<Book>,
    pub mention_users: Vec<User>,
    pub mention_books: Vec<Book>,
    pub reply_parent_remote_id: Option<String>,
    /// Target of a boost
    pub boosted_remote_id: Option<String>,
    /// Non-deleted direct replies
    pub reply_count: i64,
}

/// Builds ActivityPub JSON for one instance
#[derive(Debug, Clone)]
pub struct StatusSerializer {
    base_url: String,
    page_length: usize,
}

impl StatusSerializer {
    pub fn new(base_url: impl Into<String>, page_length: usize) -> Self {
        Self {
            base_url: base_url.into(),
            page_length: page_length.max(1),
        }
    }

    /// Serialize a status in the requested format
    ///
    /// Deleted statuses become a `Tombstone`; boosts become an `Announce`
    /// that is identical in both formats.
    pub fn to_activity(&self, bundle: &StatusBundle, format: Format) -> Value {
        let status = &bundle.status;

        if status.deleted {
            return self.tombstone(status);
        }

        if let StatusKind::Boost { .. } = status.kind {
            return self.announce(bundle);
        }

        let (to, cc) = audience(
            status.privacy,
            &bundle.author,
            &mention_ids(&bundle.mention_users),
        );

        let mut object = Map::new();
        object.insert("@context".into(), json!(AS_CONTEXT));
        object.insert("id".into(), json!(status.remote_id));
        object.insert("url".into(), json!(status.remote_id));
        object.insert("attributedTo".into(), json!(bundle.author.remote_id));
        object.insert("published".into(), json!(status.published_date.to_rfc3339()));
        object.insert("summary".into(), json!(status.content_warning));
        object.insert("sensitive".into(), json!(status.sensitive));
        object.insert("inReplyTo".into(), json!(bundle.reply_parent_remote_id));
        object.insert("to".into(), json!(to));
        object.insert("cc".into(), json!(cc));
        object.insert("tag".into(), Value::Array(self.tags(bundle)));
        object.insert("replies".into(), self.replies_collection(status, bundle.reply_count));

        match format {
            Format::Native => self.native_fields(bundle, &mut object),
            Format::Pure => self.pure_fields(bundle, &mut object),
        }

        Value::Object(object)
    }

    fn native_fields(&self, bundle: &StatusBundle, object: &mut Map<String, Value>) {
        let status = &bundle.status;
        object.insert("type".into(), json!(status.status_type().as_str()));
        object.insert("content".into(), json!(status.content));
        object.insert("attachment".into(), json!([]));

        let book_remote_id = bundle.book.as_ref().map(|b| b.remote_id.clone());
        match &status.kind {
            StatusKind::Comment { .. } => {
                object.insert("inReplyToBook".into(), json!(book_remote_id));
            }
            StatusKind::Quotation { quote, .. } => {
                object.insert("inReplyToBook".into(), json!(book_remote_id));
                object.insert("quote".into(), json!(quote));
            }
            StatusKind::Review { name, rating, .. } => {
                object.insert("inReplyToBook".into(), json!(book_remote_id));
                object.insert("name".into(), json!(name));
                object.insert("rating".into(), json!(rating));
            }
            StatusKind::Note | StatusKind::GeneratedNote | StatusKind::Boost { .. } => {}
        }
    }

    fn pure_fields(&self, bundle: &StatusBundle, object: &mut Map<String, Value>) {
        let status = &bundle.status;
        let book_link = bundle.book.as_ref().map(Book::html_link).unwrap_or_default();

        let (object_type, content) = match &status.kind {
            StatusKind::GeneratedNote => {
                let links = bundle
                    .mention_books
                    .iter()
                    .map(Book::html_link)
                    .collect::<Vec<_>>()
                    .join(", ");
                (
                    "Note",
                    format!("{} {} {}", bundle.author.display_name(), status.content, links),
                )
            }
            StatusKind::Comment { .. } => (
                "Note",
                format!("{}<p>(comment on {})</p>", status.content, book_link),
            ),
            StatusKind::Quotation { quote, .. } => (
                "Note",
                format!("{} <p>-- {}</p>{}", quote, book_link, status.content),
            ),
            StatusKind::Review { name, rating, .. } => {
                let title = bundle.book.as_ref().map(|b| b.title.as_str()).unwrap_or("");
                object.insert(
                    "name".into(),
                    json!(review_title(title, *rating, name.as_deref())),
                );
                ("Article", status.content.clone())
            }
            StatusKind::Note | StatusKind::Boost { .. } => ("Note", status.content.clone()),
        };

        object.insert("type".into(), json!(object_type));
        object.insert("content".into(), json!(content));
        object.insert("attachment".into(), Value::Array(self.cover_attachments(bundle)));
    }

    /// Cover images of mentioned books, then the status's own book
    fn cover_attachments(&self, bundle: &StatusBundle) -> Vec<Value> {
        bundle
            .mention_books
            .iter()
            .take(MAX_MENTIONED_COVERS)
            .chain(bundle.book.iter())
            .filter_map(|book| {
                book.cover.as_ref().map(|cover| {
                    json!({
                        "type": "Image",
                        "url": format!("{}/images/{}", self.base_url, cover.trim_start_matches('/')),
                        "name": book.alt_text()
                    })
                })
            })
            .collect()
    }

    fn tags(&self, bundle: &StatusBundle) -> Vec<Value> {
        let users = bundle.mention_users.iter().map(|user| {
            json!({
                "type": "Mention",
                "href": user.remote_id,
                "name": user.username
            })
        });
        let books = bundle.mention_books.iter().map(|book| {
            json!({
                "type": "Book",
                "href": book.remote_id,
                "name": book.title
            })
        });
        users.chain(books).collect()
    }

    fn tombstone(&self, status: &Status) -> Value {
        json!({
            "@context": AS_CONTEXT,
            "id": status.remote_id,
            "type": "Tombstone",
            "url": status.remote_id,
            "published": status.published_date.to_rfc3339(),
            "deleted": status
                .deleted_date
                .unwrap_or(status.updated_at)
                .to_rfc3339()
        })
    }

    fn announce(&self, bundle: &StatusBundle) -> Value {
        let status = &bundle.status;
        let (to, cc) = audience(status.privacy, &bundle.author, &[]);

        json!({
            "@context": AS_CONTEXT,
            "id": status.remote_id,
            "type": "Announce",
            "actor": bundle.author.remote_id,
            "object": bundle.boosted_remote_id,
            "published": status.published_date.to_rfc3339(),
            "to": to,
            "cc": cc
        })
    }

    /// Summary `OrderedCollection` of a status's replies
    pub fn replies_collection(&self, status: &Status, total_items: i64) -> Value {
        let id = format!("{}/replies", status.remote_id);
        let paginator = Paginator::new(total_items.max(0) as usize, self.page_length);

        json!({
            "@context": AS_CONTEXT,
            "id": id,
            "type": "OrderedCollection",
            "totalItems": total_items,
            "first": format!("{}?page=1", id),
            "last": format!("{}?page={}", id, paginator.num_pages())
        })
    }

    /// One `OrderedCollectionPage` of replies
    pub fn replies_page(
        &self,
        status: &Status,
        page: usize,
        num_pages: usize,
        items: Vec<Value>,
    ) -> Value {
        let collection_id = format!("{}/replies", status.remote_id);
        let mut object = json!({
            "@context": AS_CONTEXT,
            "id": format!("{}?page={}", collection_id, page),
            "type": "OrderedCollectionPage",
            "partOf": collection_id,
            "orderedItems": items
        });

        if page < num_pages {
            object["next"] = json!(format!("{}?page={}", collection_id, page + 1));
        }
        if page > 1 {
            object["prev"] = json!(format!("{}?page={}", collection_id, page - 1));
        }

        object
    }
}

/// `Like` for a favorite
pub fn favorite_to_activity(favorite: &Favorite, user: &User, status_remote_id: &str) -> Value {
    json!({
        "@context": AS_CONTEXT,
        "id": favorite.remote_id,
        "type": "Like",
        "actor": user.remote_id,
        "object": status_remote_id
    })
}

/// Remote id of a favorite
pub fn favorite_remote_id(user: &User, favorite_id: &str) -> String {
    format!("{}/favorite/{}", user.remote_id, favorite_id)
}

/// Pure-format title of a review
///
/// `Review of "Title" (3 stars): name`
pub fn review_title(book_title: &str, rating: Option<u8>, name: Option<&str>) -> String {
    let name = name.unwrap_or("");
    match rating {
        Some(n) => format!("Review of \"{}\" ({} stars): {}", book_title, n, name),
        None => format!("Review of \"{}\": {}", book_title, name),
    }
}

fn mention_ids(users: &[User]) -> Vec<String> {
    users.iter().map(|u| u.remote_id.clone()).collect()
}

/// `to` and `cc` for a privacy tier
pub fn audience(privacy: Privacy, author: &User, mentions: &[String]) -> (Vec<String>, Vec<String>) {
    let followers = author.followers_uri();
    let public = PUBLIC.to_string();

    match privacy {
        Privacy::Public => {
            let mut cc = vec![followers];
            cc.extend(mentions.iter().cloned());
            (vec![public], cc)
        }
        Privacy::Unlisted => {
            let mut cc = vec![public];
            cc.extend(mentions.iter().cloned());
            (vec![followers], cc)
        }
        Privacy::Followers => (vec![followers], mentions.to_vec()),
        Privacy::Direct => (mentions.to_vec(), Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BookKind, EntityId};
    use chrono::Utc;

    const BASE: &str = "https://local.com";

    fn serializer() -> StatusSerializer {
        StatusSerializer::new(BASE, 15)
    }

    fn mouse() -> User {
        let now = Utc::now();
        User {
            id: EntityId::new().0,
            username: "mouse@local.com".to_string(),
            localname: Some("mouse".to_string()),
            name: None,
            summary: None,
            local: true,
            remote_id: format!("{}/user/mouse", BASE),
            inbox: format!("{}/user/mouse/inbox", BASE),
            outbox: None,
            shared_inbox: None,
            followers_url: None,
            native_peer: true,
            manually_approves_followers: false,
            is_admin: false,
            public_key_pem: None,
            private_key_pem: None,
            server_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn edition() -> Book {
        Book {
            id: "book".to_string(),
            remote_id: format!("{}/book/1", BASE),
            kind: BookKind::Edition,
            title: "Test Edition".to_string(),
            subtitle: None,
            authors: None,
            isbn_10: None,
            isbn_13: None,
            cover: Some("covers/test.jpg".to_string()),
            physical_format: None,
            published_year: None,
            parent_work_id: None,
            default_edition_id: None,
            created_at: Utc::now(),
        }
    }

    fn bundle(kind: StatusKind) -> StatusBundle {
        let author = mouse();
        let mut status = Status::new(
            "1".to_string(),
            format!("{}/status/1", author.remote_id),
            author.id.clone(),
            kind,
        );
        status.content = "test content".to_string();
        let book = status.book_id().map(|_| edition());
        StatusBundle {
            status,
            author,
            book,
            mention_users: vec![],
            mention_books: vec![],
            reply_parent_remote_id: None,
            boosted_remote_id: None,
            reply_count: 0,
        }
    }

    #[test]
    fn note_serializes_the_same_in_both_formats() {
        let note = bundle(StatusKind::Note);
        let native = serializer().to_activity(&note, Format::Native);
        assert_eq!(native["id"], note.status.remote_id);
        assert_eq!(native["type"], "Note");
        assert_eq!(native["content"], "test content");
        assert_eq!(native["sensitive"], false);
        assert_eq!(native["attachment"], json!([]));

        let pure = serializer().to_activity(&note, Format::Pure);
        assert_eq!(pure["type"], "Note");
        assert_eq!(pure["content"], "test content");
    }

    #[test]
    fn deleted_status_is_a_tombstone() {
        let mut note = bundle(StatusKind::Note);
        note.status.deleted = true;
        note.status.deleted_date = Some(Utc::now());

        let activity = serializer().to_activity(&note, Format::Native);
        assert_eq!(activity["id"], note.status.remote_id);
        assert_eq!(activity["type"], "Tombstone");
        assert!(activity.get("content").is_none());
        assert!(activity.get("deleted").is_some());
    }

    #[test]
    fn generated_note_pure_content_names_author_and_books() {
        let mut note = bundle(StatusKind::GeneratedNote);
        note.mention_books = vec![edition()];
        note.mention_users = vec![mouse()];

        let native = serializer().to_activity(&note, Format::Native);
        assert_eq!(native["type"], "GeneratedNote");
        assert_eq!(native["content"], "test content");
        assert_eq!(native["tag"].as_array().unwrap().len(), 2);

        let pure = serializer().to_activity(&note, Format::Pure);
        assert_eq!(pure["type"], "Note");
        assert_eq!(
            pure["content"],
            format!(
                "mouse test content <a href=\"{}/book/1\">\"Test Edition\"</a>",
                BASE
            )
        );
        assert_eq!(pure["tag"].as_array().unwrap().len(), 2);
        assert_eq!(pure["attachment"][0]["type"], "Image");
        assert_eq!(
            pure["attachment"][0]["url"],
            format!("{}/images/covers/test.jpg", BASE)
        );
        assert_eq!(pure["attachment"][0]["name"], "Test Edition cover");
    }

    #[test]
    fn comment_formats() {
        let comment = bundle(StatusKind::Comment {
            book_id: "book".to_string(),
        });

        let native = serializer().to_activity(&comment, Format::Native);
        assert_eq!(native["type"], "Comment");
        assert_eq!(native["content"], "test content");
        assert_eq!(native["inReplyToBook"], format!("{}/book/1", BASE));

        let pure = serializer().to_activity(&comment, Format::Pure);
        assert_eq!(pure["type"], "Note");
        assert_eq!(
            pure["content"],
            format!(
                "test content<p>(comment on <a href=\"{}/book/1\">\"Test Edition\"</a>)</p>",
                BASE
            )
        );
        assert!(pure.get("inReplyToBook").is_none());
        assert_eq!(pure["attachment"][0]["name"], "Test Edition cover");
    }

    #[test]
    fn quotation_formats() {
        let quotation = bundle(StatusKind::Quotation {
            book_id: "book".to_string(),
            quote: "a sickening sense".to_string(),
        });

        let native = serializer().to_activity(&quotation, Format::Native);
        assert_eq!(native["type"], "Quotation");
        assert_eq!(native["quote"], "a sickening sense");
        assert_eq!(native["content"], "test content");
        assert_eq!(native["inReplyToBook"], format!("{}/book/1", BASE));

        let pure = serializer().to_activity(&quotation, Format::Pure);
        assert_eq!(pure["type"], "Note");
        assert_eq!(
            pure["content"],
            format!(
                "a sickening sense <p>-- <a href=\"{}/book/1\">\"Test Edition\"</a></p>test content",
                BASE
            )
        );
        assert!(pure.get("quote").is_none());
    }

    #[test]
    fn review_formats() {
        let review = bundle(StatusKind::Review {
            book_id: "book".to_string(),
            name: Some("Review name".to_string()),
            rating: Some(3),
        });

        let native = serializer().to_activity(&review, Format::Native);
        assert_eq!(native["type"], "Review");
        assert_eq!(native["rating"], 3);
        assert_eq!(native["name"], "Review name");
        assert_eq!(native["content"], "test content");
        assert_eq!(native["inReplyToBook"], format!("{}/book/1", BASE));

        let pure = serializer().to_activity(&review, Format::Pure);
        assert_eq!(pure["type"], "Article");
        assert_eq!(pure["name"], "Review of \"Test Edition\" (3 stars): Review name");
        assert_eq!(pure["content"], "test content");
        assert!(pure.get("rating").is_none());
        assert_eq!(pure["attachment"][0]["type"], "Image");
    }

    #[test]
    fn review_title_counts_stars_and_handles_missing_ratings() {
        assert_eq!(
            review_title("Book", Some(1), Some("meh")),
            "Review of \"Book\" (1 stars): meh"
        );
        assert_eq!(review_title("Book", None, Some("hm")), "Review of \"Book\": hm");
    }

    #[test]
    fn boost_is_identical_in_both_formats() {
        let mut boost = bundle(StatusKind::Boost {
            boosted_status_id: "0".to_string(),
        });
        boost.boosted_remote_id = Some(format!("{}/user/mouse/status/0", BASE));

        let native = serializer().to_activity(&boost, Format::Native);
        assert_eq!(native["type"], "Announce");
        assert_eq!(native["actor"], boost.author.remote_id);
        assert_eq!(native["object"], format!("{}/user/mouse/status/0", BASE));
        assert_eq!(native, serializer().to_activity(&boost, Format::Pure));
    }

    #[test]
    fn favorite_is_a_like() {
        let user = mouse();
        let favorite = Favorite {
            id: "fav".to_string(),
            remote_id: favorite_remote_id(&user, "fav"),
            user_id: user.id.clone(),
            status_id: "1".to_string(),
            created_at: Utc::now(),
        };
        let activity = favorite_to_activity(&favorite, &user, "https://local.com/user/mouse/status/1");
        assert_eq!(activity["type"], "Like");
        assert_eq!(activity["actor"], user.remote_id);
        assert_eq!(activity["object"], "https://local.com/user/mouse/status/1");
        assert_eq!(activity["id"], format!("{}/favorite/fav", user.remote_id));
    }

    #[test]
    fn audiences_follow_privacy() {
        let author = mouse();
        let mentions = vec!["https://remote.com/user/rat".to_string()];
        let followers = author.followers_uri();

        let (to, cc) = audience(Privacy::Public, &author, &mentions);
        assert_eq!(to, vec![PUBLIC.to_string()]);
        assert_eq!(cc, vec![followers.clone(), mentions[0].clone()]);

        let (to, cc) = audience(Privacy::Unlisted, &author, &mentions);
        assert_eq!(to, vec![followers.clone()]);
        assert_eq!(cc, vec![PUBLIC.to_string(), mentions[0].clone()]);

        let (to, cc) = audience(Privacy::Followers, &author, &mentions);
        assert_eq!(to, vec![followers]);
        assert_eq!(cc, mentions);

        let (to, cc) = audience(Privacy::Direct, &author, &mentions);
        assert_eq!(to, mentions);
        assert!(cc.is_empty());
    }

    #[test]
    fn replies_collection_points_at_first_and_last_pages() {
        let note = bundle(StatusKind::Note);
        let replies = StatusSerializer::new(BASE, 1).replies_collection(&note.status, 2);
        assert_eq!(replies["id"], format!("{}/replies", note.status.remote_id));
        assert_eq!(replies["totalItems"], 2);
        assert_eq!(replies["last"], format!("{}/replies?page=2", note.status.remote_id));
    }

    #[test]
    fn pure_attachments_cap_mentioned_covers() {
        let mut note = bundle(StatusKind::GeneratedNote);
        note.mention_books = (0..6).map(|_| edition()).collect();
        let pure = serializer().to_activity(&note, Format::Pure);
        assert_eq!(pure["attachment"].as_array().unwrap().len(), 4);
    }
}
