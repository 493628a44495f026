//! Small request and lookup helpers shared by handlers

use axum::http::{HeaderMap, header};

use crate::data::{Book, Database};
use crate::error::AppError;

/// Whether the client wants JSON rather than a page
pub fn is_api_request(headers: &HeaderMap, path: &str) -> bool {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    accept.contains("application/json")
        || accept.contains("application/activity+json")
        || accept.contains("application/ld+json")
        || path.ends_with(".json")
}

/// Whether the request comes from another Quire instance
///
/// Quire identifies itself with `(Quire/x.y.z; +https://...)` in its
/// User-Agent.
pub fn is_quire_request(headers: &HeaderMap) -> bool {
    headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .and_then(|ua| ua.split_once("(Quire/"))
        .is_some_and(|(_, rest)| {
            rest.split(';')
                .next()
                .is_some_and(|version| !version.is_empty() && rest.contains(';'))
        })
}

/// Edition for a book id: editions are returned as-is, works resolve to
/// their default edition, falling back to their oldest edition
pub async fn get_edition(db: &Database, book_id: &str) -> Result<Book, AppError> {
    let book = db.get_book(book_id).await?.ok_or(AppError::NotFound)?;
    if !book.is_work() {
        return Ok(book);
    }

    if let Some(default_id) = book.default_edition_id.as_deref()
        && let Some(edition) = db.get_book(default_id).await?
    {
        return Ok(edition);
    }

    db.get_first_edition(&book.id)
        .await?
        .ok_or(AppError::NotFound)
}
