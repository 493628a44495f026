//! Database tests

use super::*;
use crate::error::AppError;
use chrono::{Duration, Utc};
use tempfile::TempDir;

/// Helper to create a test database
async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::connect(&db_path).await.unwrap();
    (db, temp_dir)
}

fn test_user(localname: &str, local: bool) -> User {
    let now = Utc::now();
    let host = if local { "local.com" } else { "remote.com" };
    User {
        id: EntityId::new().0,
        username: format!("{}@{}", localname, host),
        localname: local.then(|| localname.to_string()),
        name: None,
        summary: None,
        local,
        remote_id: format!("https://{}/user/{}", host, localname),
        inbox: format!("https://{}/user/{}/inbox", host, localname),
        outbox: None,
        shared_inbox: None,
        followers_url: None,
        native_peer: local,
        manually_approves_followers: false,
        is_admin: false,
        public_key_pem: None,
        private_key_pem: None,
        server_name: None,
        created_at: now,
        updated_at: now,
    }
}

fn test_note(user: &User, content: &str) -> Status {
    let id = EntityId::new().0;
    let mut status = Status::new(
        id.clone(),
        format!("{}/status/{}", user.remote_id, id),
        user.id.clone(),
        StatusKind::Note,
    );
    status.content = content.to_string();
    status
}

fn test_edition(title: &str) -> Book {
    let id = EntityId::new().0;
    Book {
        remote_id: format!("https://local.com/book/{}", id),
        id,
        kind: BookKind::Edition,
        title: title.to_string(),
        subtitle: None,
        authors: None,
        isbn_10: None,
        isbn_13: None,
        cover: None,
        physical_format: None,
        published_year: None,
        parent_work_id: None,
        default_edition_id: None,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_database_connection() {
    let (_db, _temp_dir) = create_test_db().await;
    // Connection successful if we get here without panicking
}

#[tokio::test]
async fn test_user_insert_and_lookup() {
    let (db, _temp_dir) = create_test_db().await;
    let user = test_user("mouse", true);
    db.insert_user(&user).await.unwrap();

    let by_id = db.get_user(&user.id).await.unwrap().unwrap();
    assert_eq!(by_id.username, "mouse@local.com");

    let by_localname = db.get_user_by_localname("Mouse").await.unwrap().unwrap();
    assert_eq!(by_localname.id, user.id);

    let by_username = db.get_user_by_username("MOUSE@local.com").await.unwrap();
    assert!(by_username.is_some());

    let by_remote_id = db.get_user_by_remote_id(&user.remote_id).await.unwrap();
    assert!(by_remote_id.is_some());

    // Duplicate usernames are rejected as conflicts
    let mut dup = test_user("mouse", true);
    dup.remote_id = "https://local.com/user/other".to_string();
    let err = db.insert_user(&dup).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn test_upsert_remote_user_keeps_id() {
    let (db, _temp_dir) = create_test_db().await;
    let rat = test_user("rat", false);
    let stored = db.upsert_remote_user(&rat).await.unwrap();
    assert_eq!(stored.id, rat.id);

    let mut refreshed = test_user("rat", false);
    refreshed.name = Some("Rat".to_string());
    let stored_again = db.upsert_remote_user(&refreshed).await.unwrap();
    assert_eq!(stored_again.id, rat.id);
    assert_eq!(stored_again.name.as_deref(), Some("Rat"));
}

#[tokio::test]
async fn test_follow_and_block() {
    let (db, _temp_dir) = create_test_db().await;
    let mouse = test_user("mouse", true);
    let rat = test_user("rat", false);
    db.insert_user(&mouse).await.unwrap();
    db.insert_user(&rat).await.unwrap();

    assert!(db.add_follow(&rat.id, &mouse.id).await.unwrap());
    assert!(!db.add_follow(&rat.id, &mouse.id).await.unwrap());
    assert!(db.is_following(&rat.id, &mouse.id).await.unwrap());
    assert_eq!(db.get_followers(&mouse.id).await.unwrap().len(), 1);

    let inboxes = db
        .get_remote_follower_inboxes(&mouse.id, Some(false))
        .await
        .unwrap();
    assert_eq!(inboxes, vec![(rat.inbox.clone(), None)]);
    let native_inboxes = db
        .get_remote_follower_inboxes(&mouse.id, Some(true))
        .await
        .unwrap();
    assert!(native_inboxes.is_empty());

    // Blocking severs the follow
    assert!(db.add_block(&mouse.id, &rat.id).await.unwrap());
    assert!(!db.is_following(&rat.id, &mouse.id).await.unwrap());
    assert!(db.is_blocking(&mouse.id, &rat.id).await.unwrap());
    assert_eq!(db.get_blocker_ids(&rat.id).await.unwrap(), vec![mouse.id.clone()]);

    assert!(db.remove_block(&mouse.id, &rat.id).await.unwrap());
    assert!(db.get_blocked_ids(&mouse.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_status_crud_with_mentions() {
    let (db, _temp_dir) = create_test_db().await;
    let mouse = test_user("mouse", true);
    let rat = test_user("rat", false);
    db.insert_user(&mouse).await.unwrap();
    db.insert_user(&rat).await.unwrap();
    let book = test_edition("Example Edition");
    db.insert_book(&book).await.unwrap();

    let status = test_note(&mouse, "hi @rat");
    db.insert_status(&status, &[rat.id.clone()], &[book.id.clone()])
        .await
        .unwrap();

    let retrieved = db.get_status(&status.id).await.unwrap().unwrap();
    assert_eq!(retrieved.content, "hi @rat");
    assert_eq!(retrieved.status_type(), StatusType::Note);

    let by_remote_id = db.get_status_by_remote_id(&status.remote_id).await.unwrap();
    assert!(by_remote_id.is_some());

    assert!(db.is_user_mentioned(&status.id, &rat.id).await.unwrap());
    assert_eq!(db.get_mentioned_users(&status.id).await.unwrap().len(), 1);
    assert_eq!(
        db.get_mentioned_books(&status.id).await.unwrap()[0].title,
        "Example Edition"
    );

    db.mark_status_deleted(&status.id, Utc::now()).await.unwrap();
    let deleted = db.get_status(&status.id).await.unwrap().unwrap();
    assert!(deleted.deleted);
    assert!(deleted.deleted_date.is_some());
    assert_eq!(deleted.content, "");
}

#[tokio::test]
async fn test_review_round_trips_through_the_table() {
    let (db, _temp_dir) = create_test_db().await;
    let mouse = test_user("mouse", true);
    db.insert_user(&mouse).await.unwrap();
    let book = test_edition("Example Edition");
    db.insert_book(&book).await.unwrap();

    let id = EntityId::new().0;
    let mut review = Status::new(
        id.clone(),
        format!("{}/status/{}", mouse.remote_id, id),
        mouse.id.clone(),
        StatusKind::Review {
            book_id: book.id.clone(),
            name: Some("Review name".to_string()),
            rating: Some(3),
        },
    );
    review.content = "test content".to_string();
    db.insert_status(&review, &[], &[]).await.unwrap();

    let stored = db.get_status(&id).await.unwrap().unwrap();
    assert_eq!(stored.kind, review.kind);
    assert_eq!(stored.book_id(), Some(book.id.as_str()));
}

#[tokio::test]
async fn test_replies_are_direct_children_oldest_first() {
    let (db, _temp_dir) = create_test_db().await;
    let mouse = test_user("mouse", true);
    db.insert_user(&mouse).await.unwrap();

    let parent = test_note(&mouse, "parent");
    db.insert_status(&parent, &[], &[]).await.unwrap();

    let mut first = test_note(&mouse, "first");
    first.reply_parent_id = Some(parent.id.clone());
    first.published_date = Utc::now() - Duration::minutes(5);
    db.insert_status(&first, &[], &[]).await.unwrap();

    let mut second = test_note(&mouse, "second");
    second.reply_parent_id = Some(parent.id.clone());
    db.insert_status(&second, &[], &[]).await.unwrap();

    let mut grandchild = test_note(&mouse, "grandchild");
    grandchild.reply_parent_id = Some(first.id.clone());
    db.insert_status(&grandchild, &[], &[]).await.unwrap();

    let mut gone = test_note(&mouse, "gone");
    gone.reply_parent_id = Some(parent.id.clone());
    db.insert_status(&gone, &[], &[]).await.unwrap();
    db.mark_status_deleted(&gone.id, Utc::now()).await.unwrap();

    let filter = FeedFilter {
        viewer_id: Some(mouse.id.clone()),
        privacy: vec![Privacy::Public, Privacy::Unlisted, Privacy::Followers, Privacy::Direct],
        ..Default::default()
    };
    let replies = db.get_replies(&parent.id, &filter, 10, 0).await.unwrap();
    let contents: Vec<_> = replies.iter().map(|s| s.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second"]);
    assert_eq!(db.count_replies(&parent.id, &filter).await.unwrap(), 2);
}

#[tokio::test]
async fn test_duplicate_favorite_is_conflict() {
    let (db, _temp_dir) = create_test_db().await;
    let mouse = test_user("mouse", true);
    db.insert_user(&mouse).await.unwrap();
    let status = test_note(&mouse, "hi");
    db.insert_status(&status, &[], &[]).await.unwrap();

    let favorite = Favorite {
        id: EntityId::new().0,
        remote_id: format!("{}/favorite/1", mouse.remote_id),
        user_id: mouse.id.clone(),
        status_id: status.id.clone(),
        created_at: Utc::now(),
    };
    db.insert_favorite(&favorite).await.unwrap();

    let again = Favorite {
        id: EntityId::new().0,
        remote_id: format!("{}/favorite/2", mouse.remote_id),
        ..favorite.clone()
    };
    let err = db.insert_favorite(&again).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(db.count_favorites(&status.id).await.unwrap(), 1);

    db.delete_favorite(&favorite.id).await.unwrap();
    assert!(db.get_favorite(&mouse.id, &status.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_notifications_default_unread() {
    let (db, _temp_dir) = create_test_db().await;
    let mouse = test_user("mouse", true);
    db.insert_user(&mouse).await.unwrap();

    let notification = Notification::new(&mouse.id, NotificationType::Favorite);
    db.insert_notification(&notification).await.unwrap();

    let stored = db.get_notifications(&mouse.id, 10, true).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].read);
    assert_eq!(db.count_unread_notifications(&mouse.id).await.unwrap(), 1);

    assert_eq!(db.mark_all_notifications_read(&mouse.id).await.unwrap(), 1);
    assert_eq!(db.count_unread_notifications(&mouse.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_notification_type_is_checked_by_the_database() {
    let (db, _temp_dir) = create_test_db().await;
    let mouse = test_user("mouse", true);
    db.insert_user(&mouse).await.unwrap();

    let result = sqlx::query(
        "INSERT INTO notifications (id, user_id, notification_type, read, created_at) VALUES (?, ?, 'GLORB', 0, ?)",
    )
    .bind(EntityId::new().0)
    .bind(&mouse.id)
    .bind(Utc::now())
    .execute(db.pool_for_test())
    .await;

    let err = AppError::from_integrity(result.unwrap_err(), "notification");
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn test_shelves_and_default_shelf_moves() {
    let (db, _temp_dir) = create_test_db().await;
    let mouse = test_user("mouse", true);
    db.insert_user(&mouse).await.unwrap();
    let book = test_edition("Example Edition");
    db.insert_book(&book).await.unwrap();

    for (identifier, name) in DEFAULT_SHELVES {
        db.insert_shelf(&Shelf {
            id: EntityId::new().0,
            remote_id: format!("{}/books/{}", mouse.remote_id, identifier),
            user_id: mouse.id.clone(),
            identifier: identifier.to_string(),
            name: name.to_string(),
            privacy: Privacy::Public,
            editable: false,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    }
    assert_eq!(db.get_user_shelves(&mouse.id).await.unwrap().len(), 3);

    let to_read = db
        .get_shelf_by_identifier(&mouse.id, "to-read")
        .await
        .unwrap()
        .unwrap();
    assert!(db.add_book_to_shelf(&to_read.id, &book.id, &mouse.id).await.unwrap());
    assert!(!db.add_book_to_shelf(&to_read.id, &book.id, &mouse.id).await.unwrap());

    assert_eq!(
        db.remove_book_from_default_shelves(&mouse.id, &book.id)
            .await
            .unwrap(),
        1
    );
    assert!(db.get_shelf_books(&to_read.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_import_counts() {
    let (db, _temp_dir) = create_test_db().await;
    let mouse = test_user("mouse", true);
    db.insert_user(&mouse).await.unwrap();
    let book = test_edition("Example Edition");
    db.insert_book(&book).await.unwrap();

    let now = Utc::now();
    let job = ImportJob {
        id: EntityId::new().0,
        user_id: mouse.id.clone(),
        source: "goodreads".to_string(),
        include_reviews: true,
        privacy: Privacy::Public,
        complete: false,
        created_at: now,
        updated_date: now,
    };
    let item = |index: i64| ImportItem {
        id: EntityId::new().0,
        job_id: job.id.clone(),
        item_index: index,
        data: r#"{"title": "Example"}"#.to_string(),
        book_id: None,
        book_guess_id: None,
        fail_reason: None,
        created_at: now,
        updated_at: now,
    };
    let mut items: Vec<ImportItem> = (0..4).map(item).collect();
    db.insert_import_job(&job, &items).await.unwrap();
    assert_eq!(db.count_pending_import_items(&job.id).await.unwrap(), 4);

    // matched
    items[0].book_id = Some(book.id.clone());
    // guessed, needs review
    items[1].book_guess_id = Some(book.id.clone());
    items[1].fail_reason = Some("Could not confirm match".to_string());
    // failed outright
    items[2].fail_reason = Some("Could not find a match for book".to_string());
    for changed in &items[..3] {
        db.update_import_item_result(changed).await.unwrap();
    }

    assert_eq!(db.count_import_items(&job.id).await.unwrap(), 4);
    assert_eq!(db.count_pending_import_items(&job.id).await.unwrap(), 1);
    assert_eq!(db.count_manual_review_items(&job.id).await.unwrap(), 1);
    assert_eq!(db.count_failed_import_items(&job.id).await.unwrap(), 1);

    let page = db.get_import_items(&job.id, 2, 2).await.unwrap();
    assert_eq!(
        page.iter().map(|i| i.item_index).collect::<Vec<_>>(),
        vec![2, 3]
    );

    assert!(db.mark_import_job_complete(&job.id).await.unwrap());
    assert!(!db.mark_import_job_complete(&job.id).await.unwrap());
    assert!(db.get_import_job(&job.id).await.unwrap().unwrap().complete);
}

#[tokio::test]
async fn test_site_settings_get_or_create_and_update() {
    let (db, _temp_dir) = create_test_db().await;

    let settings = db.get_site_settings().await.unwrap();
    assert_eq!(settings.name, SiteSettings::default().name);

    let updated = SiteSettings {
        name: "Book Club".to_string(),
        admin_email: Some("admin@local.com".to_string()),
        ..settings
    };
    db.update_site_settings(&updated).await.unwrap();

    let stored = db.get_site_settings().await.unwrap();
    assert_eq!(stored.name, "Book Club");
    assert_eq!(stored.admin_email.as_deref(), Some("admin@local.com"));
}

#[tokio::test]
async fn test_edition_lookups() {
    let (db, _temp_dir) = create_test_db().await;

    let work_id = EntityId::new().0;
    let work = Book {
        id: work_id.clone(),
        remote_id: format!("https://local.com/book/{}", work_id),
        kind: BookKind::Work,
        ..test_edition("Example Work")
    };
    db.insert_book(&work).await.unwrap();

    let mut edition = test_edition("Example Edition");
    edition.parent_work_id = Some(work.id.clone());
    edition.isbn_13 = Some("9780300000000".to_string());
    db.insert_book(&edition).await.unwrap();

    let first = db.get_first_edition(&work.id).await.unwrap().unwrap();
    assert_eq!(first.id, edition.id);

    let by_isbn = db
        .find_editions_by_isbn(Some("9780300000000"), None)
        .await
        .unwrap();
    assert_eq!(by_isbn.len(), 1);

    let by_title = db.find_editions_by_title("example edition").await.unwrap();
    assert_eq!(by_title.len(), 1);

    let partial = db.search_editions_by_title("Edit", 5).await.unwrap();
    assert_eq!(partial.len(), 1);
    let none = db.search_editions_by_title("100%", 5).await.unwrap();
    assert!(none.is_empty());
}
