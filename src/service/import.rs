//! Import service
//!
//! Turns rows exported from another reading site into shelved books and
//! reviews. Each row becomes an [`ImportItem`] processed by the task queue.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::status::{NewStatus, StatusService};
use crate::AppState;
use crate::data::{
    Book, Database, EntityId, ImportItem, ImportJob, ImportRow, Notification, NotificationType,
    Privacy, StatusType, User,
};
use crate::error::AppError;
use crate::metrics::IMPORT_ITEMS_TOTAL;
use crate::pagination::{Page, PageLink, Paginator};
use crate::tasks::{SharedTaskSink, Task};

const NO_MATCH: &str = "Could not find a match for book";

/// Input for a new import
#[derive(Debug, Clone, Deserialize)]
pub struct NewImport {
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub include_reviews: bool,
    #[serde(default)]
    pub privacy: Privacy,
    pub rows: Vec<ImportRow>,
}

fn default_source() -> String {
    "goodreads".to_string()
}

/// Progress of an import job
#[derive(Debug, Clone, Serialize)]
pub struct ImportStatusView {
    pub job: ImportJob,
    pub items: Vec<ImportItem>,
    pub page: Page,
    pub page_range: Vec<PageLink>,
    pub item_count: i64,
    pub manual_review_count: i64,
    pub fail_count: i64,
    pub percent: i64,
    /// Hours since an item of the job was last processed
    pub inactive_time: f64,
}

/// Reading-status shelf for a source shelf name
pub fn map_shelf(source_shelf: &str) -> Option<&'static str> {
    match source_shelf.trim().to_ascii_lowercase().as_str() {
        "to-read" | "to_read" | "want-to-read" => Some("to-read"),
        "currently-reading" | "reading" => Some("reading"),
        "read" => Some("read"),
        _ => None,
    }
}

/// Import service
pub struct ImportService {
    db: Arc<Database>,
    tasks: SharedTaskSink,
    statuses: StatusService,
    page_length: usize,
}

impl ImportService {
    pub fn new(
        db: Arc<Database>,
        tasks: SharedTaskSink,
        base_url: String,
        page_length: usize,
    ) -> Self {
        Self {
            statuses: StatusService::new(db.clone(), tasks.clone(), base_url, page_length),
            db,
            tasks,
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

    /// Store a job with one item per row and queue every item
    pub async fn create_job(&self, user: &User, import: NewImport) -> Result<ImportJob, AppError> {
        if import.rows.is_empty() {
            return Err(AppError::Validation("nothing to import".to_string()));
        }
        if let Some(index) = import.rows.iter().position(|row| row.title.trim().is_empty()) {
            return Err(AppError::Validation(format!("row {index} has no title")));
        }

        let now = Utc::now();
        let job = ImportJob {
            id: EntityId::new().0,
            user_id: user.id.clone(),
            source: import.source,
            include_reviews: import.include_reviews,
            privacy: import.privacy,
            complete: false,
            created_at: now,
            updated_date: now,
        };

        let items = import
            .rows
            .iter()
            .enumerate()
            .map(|(index, row)| {
                let data = serde_json::to_string(row).map_err(|e| AppError::Internal(e.into()))?;
                Ok(ImportItem {
                    id: EntityId::new().0,
                    job_id: job.id.clone(),
                    item_index: index as i64,
                    data,
                    book_id: None,
                    book_guess_id: None,
                    fail_reason: None,
                    created_at: now,
                    updated_at: now,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        self.db.insert_import_job(&job, &items).await?;
        tracing::info!(job_id = %job.id, items = items.len(), "Created import job");

        for item in &items {
            self.tasks.enqueue(Task::ImportItem {
                item_id: item.id.clone(),
            });
        }

        Ok(job)
    }

    /// Match one item to a book and apply it
    ///
    /// Matching tries ISBNs, then an exact title (checked against the
    /// author when one is given). A partial title match is kept as a guess
    /// for manual review. The job completes once nothing is pending.
    pub async fn process_item(&self, item_id: &str) -> Result<(), AppError> {
        let mut item = self
            .db
            .get_import_item(item_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let job = self
            .db
            .get_import_job(&item.job_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let user = self
            .db
            .get_user(&job.user_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let row = item.fields()?;

        item.book_id = None;
        item.book_guess_id = None;
        item.fail_reason = None;

        // The item is no longer pending once its result is stored, so a
        // failed shelve or review must not skip the completion check
        let mut applied = Ok(());
        let result = match self.match_book(&row).await? {
            BookMatch::Found(book) => {
                item.book_id = Some(book.id.clone());
                self.db.update_import_item_result(&item).await?;
                applied = self.apply(&user, &job, &row, &book).await;
                "matched"
            }
            BookMatch::Guess(book) => {
                item.book_guess_id = Some(book.id);
                item.fail_reason = Some(NO_MATCH.to_string());
                self.db.update_import_item_result(&item).await?;
                "guessed"
            }
            BookMatch::Missing => {
                item.fail_reason = Some(NO_MATCH.to_string());
                self.db.update_import_item_result(&item).await?;
                "failed"
            }
        };
        IMPORT_ITEMS_TOTAL.with_label_values(&[result]).inc();
        tracing::debug!(item_id = %item.id, title = %row.title, result, "Processed import item");

        if self.db.count_pending_import_items(&job.id).await? == 0
            && self.db.mark_import_job_complete(&job.id).await?
        {
            let mut notification = Notification::new(&user.id, NotificationType::Import);
            notification.related_import_id = Some(job.id.clone());
            self.db.insert_notification(&notification).await?;
            tracing::info!(job_id = %job.id, "Import job complete");
        }

        if let Err(error) = &applied {
            tracing::warn!(item_id = %item.id, %error, "Failed to apply matched import item");
        }
        applied
    }

    async fn match_book(&self, row: &ImportRow) -> Result<BookMatch, AppError> {
        let by_isbn = self
            .db
            .find_editions_by_isbn(row.isbn_13.as_deref(), row.isbn_10.as_deref())
            .await?;
        if let Some(book) = by_isbn.into_iter().next() {
            return Ok(BookMatch::Found(book));
        }

        let by_title = self.db.find_editions_by_title(&row.title).await?;
        let author = row
            .author
            .as_deref()
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty());
        let exact = by_title.into_iter().find(|book| match (&author, &book.authors) {
            (Some(author), Some(authors)) => authors.to_lowercase().contains(author.as_str()),
            (Some(_), None) => false,
            (None, _) => true,
        });
        if let Some(book) = exact {
            return Ok(BookMatch::Found(book));
        }

        let guess = self.db.search_editions_by_title(&row.title, 1).await?;
        Ok(match guess.into_iter().next() {
            Some(book) => BookMatch::Guess(book),
            None => BookMatch::Missing,
        })
    }

    /// Shelve a matched book and post its review if asked to
    async fn apply(
        &self,
        user: &User,
        job: &ImportJob,
        row: &ImportRow,
        book: &Book,
    ) -> Result<(), AppError> {
        if let Some(shelf) = row.shelf.as_deref().and_then(map_shelf)
            && let Some(shelf) = self.db.get_shelf_by_identifier(&user.id, shelf).await?
        {
            self.db
                .remove_book_from_default_shelves(&user.id, &book.id)
                .await?;
            self.db
                .add_book_to_shelf(&shelf.id, &book.id, &user.id)
                .await?;
        }

        let rating = row.rating.filter(|r| (1..=5).contains(r));
        let review = row
            .review
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());
        if job.include_reviews && (rating.is_some() || review.is_some()) {
            self.statuses
                .create(
                    user,
                    NewStatus {
                        status_type: Some(StatusType::Review),
                        content: review.unwrap_or_default().to_string(),
                        book_id: Some(book.id.clone()),
                        rating,
                        privacy: job.privacy,
                        ..Default::default()
                    },
                )
                .await?;
        }

        Ok(())
    }

    /// Progress of one of the viewer's jobs
    ///
    /// # Errors
    /// - `NotFound` if the job does not exist
    /// - `Forbidden` if it belongs to someone else
    pub async fn import_status(
        &self,
        viewer: &User,
        job_id: &str,
        raw_page: Option<&str>,
    ) -> Result<ImportStatusView, AppError> {
        let job = self
            .db
            .get_import_job(job_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if job.user_id != viewer.id {
            return Err(AppError::Forbidden);
        }

        let total = self.db.count_import_items(&job.id).await?;
        let pending = self.db.count_pending_import_items(&job.id).await?;
        let item_count = total.max(1);

        let paginator = Paginator::new(total.max(0) as usize, self.page_length);
        let page = paginator.get_page(raw_page);
        let items = self
            .db
            .get_import_items(&job.id, page.limit, page.offset)
            .await?;

        let inactive_seconds = (Utc::now() - job.updated_date).num_seconds().max(0);

        Ok(ImportStatusView {
            items,
            page_range: paginator.elided_page_range(page.number, 2, 1),
            page,
            item_count: total,
            manual_review_count: self.db.count_manual_review_items(&job.id).await?,
            fail_count: self.db.count_failed_import_items(&job.id).await?,
            percent: ((item_count - pending) * 100) / item_count,
            inactive_time: inactive_seconds as f64 / 3600.0,
            job,
        })
    }

    /// Queue an item of one of the viewer's jobs again
    ///
    /// Items outside the viewer's jobs are reported as missing.
    pub async fn retry_item(
        &self,
        viewer: &User,
        job_id: &str,
        item_id: &str,
    ) -> Result<(), AppError> {
        let job = self
            .db
            .get_import_job(job_id)
            .await?
            .filter(|job| job.user_id == viewer.id)
            .ok_or(AppError::NotFound)?;
        let item = self
            .db
            .get_import_item(item_id)
            .await?
            .filter(|item| item.job_id == job.id)
            .ok_or(AppError::NotFound)?;

        tracing::info!(job_id = %job.id, item_id = %item.id, "Retrying import item");
        self.tasks.enqueue(Task::ImportItem { item_id: item.id });
        Ok(())
    }
}

enum BookMatch {
    Found(Book),
    Guess(Book),
    Missing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::service::AccountService;
    use crate::tasks::MockTaskSink;
    use crate::test_support::{edition, null_sink, test_state};

    fn row(title: &str) -> ImportRow {
        ImportRow {
            title: title.to_string(),
            ..Default::default()
        }
    }

    async fn fixture(tasks: SharedTaskSink) -> (ImportService, AppState, User, tempfile::TempDir) {
        let (state, dir) = test_state(tasks).await;
        let mouse = AccountService::from_state(&state)
            .create_local_user("mouse", None, false)
            .await
            .unwrap();
        (ImportService::from_state(&state), state, mouse, dir)
    }

    async fn items(state: &AppState, job: &ImportJob) -> Vec<ImportItem> {
        state.db.get_import_items(&job.id, 100, 0).await.unwrap()
    }

    #[test]
    fn source_shelves_map_to_reading_status_shelves() {
        assert_eq!(map_shelf("currently-reading"), Some("reading"));
        assert_eq!(map_shelf("to-read"), Some("to-read"));
        assert_eq!(map_shelf("Read"), Some("read"));
        assert_eq!(map_shelf("favorites"), None);
    }

    #[tokio::test]
    async fn creating_a_job_queues_every_item() {
        let mut sink = MockTaskSink::new();
        sink.expect_enqueue()
            .withf(|task| matches!(task, Task::ImportItem { .. }))
            .times(2)
            .return_const(());
        let (service, state, mouse, _dir) = fixture(Arc::new(sink)).await;

        let job = service
            .create_job(
                &mouse,
                NewImport {
                    source: "goodreads".to_string(),
                    include_reviews: false,
                    privacy: Privacy::Public,
                    rows: vec![row("One"), row("Two")],
                },
            )
            .await
            .unwrap();

        let stored = items(&state, &job).await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].fields().unwrap().title, "Two");
        assert!(stored.iter().all(ImportItem::is_pending));
    }

    #[tokio::test]
    async fn empty_imports_are_rejected() {
        let (service, _state, mouse, _dir) = fixture(null_sink()).await;
        let empty = NewImport {
            source: "goodreads".to_string(),
            include_reviews: false,
            privacy: Privacy::Public,
            rows: vec![],
        };
        assert!(matches!(
            service.create_job(&mouse, empty).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn job_completes_even_when_shelving_the_last_item_fails() {
        let (service, state, mouse, _dir) = fixture(null_sink()).await;
        edition(&state.db, "Test Edition").await;
        let job = service
            .create_job(
                &mouse,
                NewImport {
                    source: "goodreads".to_string(),
                    include_reviews: false,
                    privacy: Privacy::Public,
                    rows: vec![ImportRow {
                        title: "Test Edition".to_string(),
                        shelf: Some("read".to_string()),
                        ..Default::default()
                    }],
                },
            )
            .await
            .unwrap();

        sqlx::query("DROP TABLE shelf_books")
            .execute(state.db.pool_for_test())
            .await
            .unwrap();

        let item = items(&state, &job).await.remove(0);
        assert!(service.process_item(&item.id).await.is_err());

        let job = state.db.get_import_job(&job.id).await.unwrap().unwrap();
        assert!(job.complete);
        let notifications = state.db.get_notifications(&mouse.id, 10, false).await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].notification_type, NotificationType::Import);
    }

    #[tokio::test]
    async fn items_match_by_isbn_title_or_guess() {
        let (service, state, mouse, _dir) = fixture(null_sink()).await;
        let template = edition(&state.db, "Unrelated Title").await;
        let isbn_id = EntityId::new().0;
        let by_isbn = Book {
            remote_id: format!("http://localhost/book/{isbn_id}"),
            id: isbn_id,
            isbn_13: Some("9780000000001".to_string()),
            ..template
        };
        state.db.insert_book(&by_isbn).await.unwrap();
        let by_title = edition(&state.db, "Test Edition").await;

        let rows = vec![
            ImportRow {
                title: "Whatever".to_string(),
                isbn_13: Some("9780000000001".to_string()),
                shelf: Some("currently-reading".to_string()),
                ..Default::default()
            },
            row("test edition"),
            row("Test"),
            row("Nothing Like It"),
        ];
        let job = service
            .create_job(
                &mouse,
                NewImport {
                    source: "goodreads".to_string(),
                    include_reviews: false,
                    privacy: Privacy::Public,
                    rows,
                },
            )
            .await
            .unwrap();

        for item in items(&state, &job).await {
            service.process_item(&item.id).await.unwrap();
        }

        let processed = items(&state, &job).await;
        assert_eq!(processed[0].book_id.as_deref(), Some(by_isbn.id.as_str()));
        assert_eq!(processed[1].book_id.as_deref(), Some(by_title.id.as_str()));
        assert!(processed[2].book_id.is_none());
        assert!(processed[2].book_guess_id.is_some());
        assert_eq!(processed[2].fail_reason.as_deref(), Some(NO_MATCH));
        assert!(processed[3].book_guess_id.is_none());
        assert!(processed[3].fail_reason.is_some());

        let reading = state
            .db
            .get_shelf_by_identifier(&mouse.id, "reading")
            .await
            .unwrap()
            .unwrap();
        let shelved = state.db.get_shelf_books(&reading.id).await.unwrap();
        assert_eq!(shelved[0].id, by_isbn.id);

        let job = state.db.get_import_job(&job.id).await.unwrap().unwrap();
        assert!(job.complete);
        let notifications = state.db.get_notifications(&mouse.id, 10, false).await.unwrap();
        assert_eq!(notifications[0].notification_type, NotificationType::Import);
        assert_eq!(notifications[0].related_import_id.as_deref(), Some(job.id.as_str()));

        let view = service.import_status(&mouse, &job.id, None).await.unwrap();
        assert_eq!(view.item_count, 4);
        assert_eq!(view.percent, 100);
        assert_eq!(view.manual_review_count, 1);
        assert_eq!(view.fail_count, 1);
    }

    #[tokio::test]
    async fn reviews_are_posted_when_included() {
        let (service, state, mouse, _dir) = fixture(null_sink()).await;
        let book = edition(&state.db, "Test Edition").await;
        let job = service
            .create_job(
                &mouse,
                NewImport {
                    source: "goodreads".to_string(),
                    include_reviews: true,
                    privacy: Privacy::Unlisted,
                    rows: vec![ImportRow {
                        title: "Test Edition".to_string(),
                        rating: Some(4),
                        review: Some("Loved it".to_string()),
                        ..Default::default()
                    }],
                },
            )
            .await
            .unwrap();
        let item = &items(&state, &job).await[0];
        service.process_item(&item.id).await.unwrap();

        let feed = state
            .db
            .fetch_feed(
                &crate::data::FeedFilter {
                    viewer_id: Some(mouse.id.clone()),
                    privacy: vec![Privacy::Unlisted],
                    ..Default::default()
                },
                10,
                0,
            )
            .await
            .unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].book_id(), Some(book.id.as_str()));
        assert_eq!(feed[0].content, "<p>Loved it</p>");
    }

    #[tokio::test]
    async fn status_view_reports_progress_and_pages() {
        let (service, state, mouse, _dir) = fixture(null_sink()).await;
        let rows = (0..20).map(|i| row(&format!("Book {i}"))).collect();
        let job = service
            .create_job(
                &mouse,
                NewImport {
                    source: "goodreads".to_string(),
                    include_reviews: false,
                    privacy: Privacy::Public,
                    rows,
                },
            )
            .await
            .unwrap();

        let stored = items(&state, &job).await;
        for item in stored.iter().take(5) {
            service.process_item(&item.id).await.unwrap();
        }
        state
            .db
            .set_import_job_updated_for_test(&job.id, Utc::now() - Duration::hours(3))
            .await
            .unwrap();

        let view = service.import_status(&mouse, &job.id, Some("2")).await.unwrap();
        assert_eq!(view.percent, 25);
        assert_eq!(view.page.number, 2);
        assert_eq!(view.items.len(), 5);
        assert_eq!(view.items[0].item_index, 15);
        assert_eq!(view.page_range, vec![PageLink::Page(1), PageLink::Page(2)]);
        assert!(view.inactive_time >= 2.99 && view.inactive_time < 3.1);
        assert!(!view.job.complete);
    }

    #[tokio::test]
    async fn other_users_cannot_see_or_retry_a_job() {
        let (service, state, mouse, _dir) = fixture(null_sink()).await;
        let badger = AccountService::from_state(&state)
            .create_local_user("badger", None, false)
            .await
            .unwrap();
        let job = service
            .create_job(
                &mouse,
                NewImport {
                    source: "goodreads".to_string(),
                    include_reviews: false,
                    privacy: Privacy::Public,
                    rows: vec![row("One")],
                },
            )
            .await
            .unwrap();
        let item = &items(&state, &job).await[0];

        assert!(matches!(
            service.import_status(&badger, &job.id, None).await,
            Err(AppError::Forbidden)
        ));
        assert!(matches!(
            service.import_status(&mouse, "missing", None).await,
            Err(AppError::NotFound)
        ));
        assert!(matches!(
            service.retry_item(&badger, &job.id, &item.id).await,
            Err(AppError::NotFound)
        ));
        assert!(service.retry_item(&mouse, &job.id, &item.id).await.is_ok());
    }
}
