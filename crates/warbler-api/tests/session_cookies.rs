mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::TestClient;
use warbler_api::session::SessionStore;

#[tokio::test]
async fn login_issues_a_new_session_id() {
    let mut client = TestClient::new();
    client.signup("testuser", "test@test.com", "testuser");

    client.post("/messages/new", &[("text", "Hello")]).await;
    let anonymous = client.session_id().unwrap();

    let resp = client
        .post("/login", &[("username", "testuser"), ("password", "testuser")])
        .await;
    assert_eq!(resp.status, StatusCode::FOUND);

    let signed_in = client.session_id().unwrap();
    assert_ne!(signed_in, anonymous);
    assert!(!client.state.sessions.contains(&anonymous));

    let resp = client.get("/messages/new").await;
    assert_eq!(resp.status, StatusCode::OK);
}

#[tokio::test]
async fn signup_issues_a_new_session_id() {
    let mut client = TestClient::new();

    client.post("/messages/new", &[("text", "Hello")]).await;
    let anonymous = client.session_id().unwrap();

    let resp = client
        .post(
            "/signup",
            &[
                ("username", "newbie"),
                ("email", "newbie@test.com"),
                ("password", "secret123"),
            ],
        )
        .await;
    assert_eq!(resp.status, StatusCode::FOUND);

    assert_ne!(client.session_id().unwrap(), anonymous);
    assert!(!client.state.sessions.contains(&anonymous));
}

#[tokio::test]
async fn planted_session_id_does_not_get_signed_in() {
    let mut client = TestClient::new();
    client.signup("testuser", "test@test.com", "testuser");

    client.post("/messages/new", &[("text", "Hello")]).await;
    let planted = client.session_id().unwrap();

    client
        .post("/login", &[("username", "testuser"), ("password", "testuser")])
        .await;

    let session = client.state.sessions.load(&planted);
    assert!(session.is_none());
}

#[tokio::test]
async fn consumed_sessions_are_released() {
    let mut client = TestClient::new();
    client.signup("testuser", "test@test.com", "testuser");

    for _ in 0..20 {
        client.forget_session();
        let resp = client.get_follow("/messages/new").await;
        assert!(resp.body.contains("Access unauthorized"));
    }
    assert!(client.state.sessions.is_empty());

    client
        .post_follow("/login", &[("username", "testuser"), ("password", "testuser")])
        .await;
    assert_eq!(client.state.sessions.len(), 1);

    let resp = client.get_follow("/logout").await;
    assert!(resp.body.contains("You have successfully logged out."));
    assert!(client.state.sessions.is_empty());
}

#[tokio::test]
async fn anonymous_sessions_are_capped() {
    let mut client = TestClient::with_sessions(SessionStore::with_limits(
        Duration::from_secs(60),
        50,
    ));

    for _ in 0..200 {
        client.forget_session();
        client.post("/messages/new", &[("text", "Hello")]).await;
    }

    assert_eq!(client.state.sessions.len(), 50);
}

#[tokio::test]
async fn expired_sessions_are_signed_out() {
    let mut client = TestClient::with_sessions(SessionStore::with_limits(Duration::ZERO, 50));
    let user = client.signup("testuser", "test@test.com", "testuser");
    client.login_as(user.id);

    let resp = client.get_follow("/messages/new").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert!(resp.body.contains("New to Warbler?"));
    assert!(!resp.body.contains("Add my message!"));
}
