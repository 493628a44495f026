//! E2E tests for posting, reacting to and reading statuses

mod common;

use common::TestServer;
use serde_json::{Value, json};

async fn create(server: &TestServer, token: &str, body: Value) -> reqwest::Response {
    server
        .client
        .post(&server.url("/api/statuses"))
        .header("Authorization", format!("Bearer {}", token))
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn post_action(server: &TestServer, token: &str, path: &str) -> reqwest::Response {
    server
        .client
        .post(&server.url(path))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_create_status_without_auth() {
    let server = TestServer::new().await;

    let response = server
        .client
        .post(&server.url("/api/statuses"))
        .json(&json!({"status_type": "Note", "content": "Hello"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_create_and_fetch_note() {
    let server = TestServer::new().await;
    let mouse = server.create_user("mouse").await;
    let token = server.token_for(&mouse);

    let response = create(
        &server,
        &token,
        json!({"status_type": "Note", "content": "Hello <b>world</b>"}),
    )
    .await;
    assert_eq!(response.status(), 201);
    let created: Value = response.json().await.unwrap();
    assert_eq!(created["content"], "<p>Hello &lt;b&gt;world&lt;/b&gt;</p>");
    assert_eq!(created["privacy"], "public");
    assert_eq!(created["author"]["id"], mouse.id);

    let id = created["id"].as_str().unwrap();
    let fetched: Value = server
        .client
        .get(&server.url(&format!("/api/statuses/{}", id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["id"], id);
}

#[tokio::test]
async fn test_review_requires_known_book_and_valid_rating() {
    let server = TestServer::new().await;
    let mouse = server.create_user("mouse").await;
    let token = server.token_for(&mouse);
    let book = server.create_book("Middlemarch").await;

    let no_book = create(&server, &token, json!({"status_type": "Review", "content": "ok"})).await;
    assert_eq!(no_book.status(), 400);

    let bad_rating = create(
        &server,
        &token,
        json!({"status_type": "Review", "book_id": book.id, "rating": 6}),
    )
    .await;
    assert_eq!(bad_rating.status(), 400);

    let review = create(
        &server,
        &token,
        json!({
            "status_type": "Review",
            "book_id": book.id,
            "name": "A slow burn",
            "rating": 4,
            "content": "Worth it."
        }),
    )
    .await;
    assert_eq!(review.status(), 201);
    let review: Value = review.json().await.unwrap();
    assert_eq!(review["status_type"], "Review");
    assert_eq!(review["rating"], 4);
}

#[tokio::test]
async fn test_favorite_notifies_author_once() {
    let server = TestServer::new().await;
    let mouse = server.create_user("mouse").await;
    let rat = server.create_user("rat").await;
    let mouse_token = server.token_for(&mouse);
    let rat_token = server.token_for(&rat);

    let created: Value = create(&server, &mouse_token, json!({"status_type": "Note", "content": "hi"}))
        .await
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap();

    let response = post_action(&server, &rat_token, &format!("/api/statuses/{}/favorite", id)).await;
    assert_eq!(response.status(), 200);

    let again = post_action(&server, &rat_token, &format!("/api/statuses/{}/favorite", id)).await;
    assert_eq!(again.status(), 409);

    let notifications: Value = server
        .client
        .get(&server.url("/api/notifications"))
        .header("Authorization", format!("Bearer {}", mouse_token))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let notifications = notifications.as_array().unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["notification_type"], "FAVORITE");
    assert_eq!(notifications[0]["related_user_id"], rat.id);

    let undone = post_action(&server, &rat_token, &format!("/api/statuses/{}/unfavorite", id)).await;
    assert_eq!(undone.status(), 204);
    let missing = post_action(&server, &rat_token, &format!("/api/statuses/{}/unfavorite", id)).await;
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn test_boost_is_idempotent_and_copies_privacy() {
    let server = TestServer::new().await;
    let mouse = server.create_user("mouse").await;
    let rat = server.create_user("rat").await;
    let rat_token = server.token_for(&rat);

    let created: Value = create(
        &server,
        &server.token_for(&mouse),
        json!({"status_type": "Note", "content": "quiet", "privacy": "unlisted"}),
    )
    .await
    .json()
    .await
    .unwrap();
    let id = created["id"].as_str().unwrap();

    let first: Value = post_action(&server, &rat_token, &format!("/api/statuses/{}/boost", id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(first["status_type"], "Announce");
    assert_eq!(first["boosted_status_id"], id);
    assert_eq!(first["privacy"], "unlisted");

    let second: Value = post_action(&server, &rat_token, &format!("/api/statuses/{}/boost", id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(second["id"], first["id"]);

    let undone = post_action(&server, &rat_token, &format!("/api/statuses/{}/unboost", id)).await;
    assert_eq!(undone.status(), 204);
}

#[tokio::test]
async fn test_followers_only_status_cannot_be_boosted() {
    let server = TestServer::new().await;
    let mouse = server.create_user("mouse").await;
    let rat = server.create_user("rat").await;
    let rat_token = server.token_for(&rat);

    post_action(&server, &rat_token, "/api/users/mouse/follow").await;
    let created: Value = create(
        &server,
        &server.token_for(&mouse),
        json!({"status_type": "Note", "content": "friends", "privacy": "followers"}),
    )
    .await
    .json()
    .await
    .unwrap();
    let id = created["id"].as_str().unwrap();

    let response = post_action(&server, &rat_token, &format!("/api/statuses/{}/boost", id)).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_only_author_can_delete() {
    let server = TestServer::new().await;
    let mouse = server.create_user("mouse").await;
    let rat = server.create_user("rat").await;
    let mouse_token = server.token_for(&mouse);

    let created: Value = create(&server, &mouse_token, json!({"status_type": "Note", "content": "oops"}))
        .await
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap();

    let forbidden = post_action(
        &server,
        &server.token_for(&rat),
        &format!("/api/statuses/{}/delete", id),
    )
    .await;
    assert_eq!(forbidden.status(), 403);

    let deleted = post_action(&server, &mouse_token, &format!("/api/statuses/{}/delete", id)).await;
    assert_eq!(deleted.status(), 200);
    let deleted: Value = deleted.json().await.unwrap();
    assert_eq!(deleted["deleted"], true);
}

#[tokio::test]
async fn test_reply_notifies_parent_author() {
    let server = TestServer::new().await;
    let mouse = server.create_user("mouse").await;
    let rat = server.create_user("rat").await;
    let mouse_token = server.token_for(&mouse);

    let parent: Value = create(&server, &mouse_token, json!({"status_type": "Note", "content": "question"}))
        .await
        .json()
        .await
        .unwrap();

    let reply = create(
        &server,
        &server.token_for(&rat),
        json!({
            "status_type": "Note",
            "content": "answer",
            "reply_parent_id": parent["id"],
            "mentions": ["mouse"]
        }),
    )
    .await;
    assert_eq!(reply.status(), 201);

    let notifications: Value = server
        .client
        .get(&server.url("/api/notifications?unread=true"))
        .header("Authorization", format!("Bearer {}", mouse_token))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let notifications = notifications.as_array().unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["notification_type"], "REPLY");

    let read: Value = server
        .client
        .post(&server.url("/api/notifications/read"))
        .header("Authorization", format!("Bearer {}", mouse_token))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(read["marked_read"], 1);
}

#[tokio::test]
async fn test_local_feed_and_unknown_tab() {
    let server = TestServer::new().await;
    let mouse = server.create_user("mouse").await;
    let token = server.token_for(&mouse);

    create(&server, &token, json!({"status_type": "Note", "content": "public"})).await;
    create(
        &server,
        &token,
        json!({"status_type": "Note", "content": "hidden", "privacy": "followers"}),
    )
    .await;

    let feed: Value = server
        .client
        .get(&server.url("/api/feed/local"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(feed["tab"], "local");
    let statuses = feed["statuses"].as_array().unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0]["content"], "<p>public</p>");
    assert_eq!(feed["page"]["number"], 1);

    let response = server
        .client
        .get(&server.url("/api/feed/sideways"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_home_feed_shows_followed_users() {
    let server = TestServer::new().await;
    let mouse = server.create_user("mouse").await;
    let rat = server.create_user("rat").await;
    let rat_token = server.token_for(&rat);

    post_action(&server, &rat_token, "/api/users/mouse/follow").await;
    create(
        &server,
        &server.token_for(&mouse),
        json!({"status_type": "Note", "content": "for my followers", "privacy": "followers"}),
    )
    .await;

    let feed: Value = server
        .client
        .get(&server.url("/api/feed/home"))
        .header("Authorization", format!("Bearer {}", rat_token))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let statuses = feed["statuses"].as_array().unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0]["author"]["id"], mouse.id);
}

#[tokio::test]
async fn test_shelving_posts_reading_status() {
    let server = TestServer::new().await;
    let mouse = server.create_user("mouse").await;
    let token = server.token_for(&mouse);
    let book = server.create_book("Dune").await;

    let shelved: Value = server
        .client
        .post(&server.url("/api/shelve"))
        .header("Authorization", format!("Bearer {}", token))
        .json(&json!({"book_id": book.id, "shelf": "reading"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(shelved["status"]["status_type"], "GeneratedNote");
    assert_eq!(shelved["status"]["content"], "started reading");

    let shelves: Value = server
        .client
        .get(&server.url("/api/users/mouse/shelves"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let reading = shelves
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["identifier"] == "reading")
        .unwrap();
    assert_eq!(reading["books"][0]["id"], book.id);

    let unshelved = server
        .client
        .post(&server.url("/api/unshelve"))
        .header("Authorization", format!("Bearer {}", token))
        .json(&json!({"book_id": book.id, "shelf": "reading"}))
        .send()
        .await
        .unwrap();
    assert_eq!(unshelved.status(), 200);
}
