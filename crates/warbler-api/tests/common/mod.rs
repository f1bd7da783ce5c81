//! Test client that drives the router in-process, carrying the session
//! cookie between requests and optionally following redirects.
#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use warbler_api::session::{SESSION_COOKIE, SessionStore};
use warbler_api::{AppState, AppStateInner, CURR_USER_KEY, auth, router};
use warbler_db::Database;
use warbler_db::models::UserRow;

pub struct TestResponse {
    pub status: StatusCode,
    pub location: Option<String>,
    pub body: String,
}

pub struct TestClient {
    pub state: AppState,
    app: Router,
    cookie: Option<String>,
}

impl TestClient {
    pub fn new() -> Self {
        Self::with_sessions(SessionStore::new())
    }

    pub fn with_sessions(sessions: SessionStore) -> Self {
        let db = Database::open_in_memory().expect("in-memory database");
        let state = AppStateInner::with_sessions(db, sessions);
        Self {
            app: router(state.clone()),
            state,
            cookie: None,
        }
    }

    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Create a user the way the signup form does.
    pub fn signup(&self, username: &str, email: &str, password: &str) -> UserRow {
        auth::register_user(self.db(), username, email, password, None).expect("signup")
    }

    /// Start a session already holding `user_id`, skipping the login form.
    pub fn login_as(&mut self, user_id: i64) {
        let id = Uuid::new_v4();
        self.state
            .sessions
            .update(id, |s| s.insert(CURR_USER_KEY, user_id));
        self.cookie = Some(format!("{SESSION_COOKIE}={id}"));
    }

    /// Session id the client currently presents, if any.
    pub fn session_id(&self) -> Option<Uuid> {
        self.cookie
            .as_deref()?
            .strip_prefix(&format!("{SESSION_COOKIE}="))?
            .parse()
            .ok()
    }

    pub fn forget_session(&mut self) {
        self.cookie = None;
    }

    pub async fn get(&mut self, uri: &str) -> TestResponse {
        self.send("GET", uri, None).await
    }

    pub async fn post(&mut self, uri: &str, form: &[(&str, &str)]) -> TestResponse {
        let body = serde_urlencoded::to_string(form).unwrap();
        self.send("POST", uri, Some(body)).await
    }

    pub async fn get_follow(&mut self, uri: &str) -> TestResponse {
        let resp = self.get(uri).await;
        self.follow(resp).await
    }

    pub async fn post_follow(&mut self, uri: &str, form: &[(&str, &str)]) -> TestResponse {
        let resp = self.post(uri, form).await;
        self.follow(resp).await
    }

    async fn follow(&mut self, mut resp: TestResponse) -> TestResponse {
        for _ in 0..5 {
            match resp.location.clone() {
                Some(location) if resp.status.is_redirection() => {
                    resp = self.get(&location).await;
                }
                _ => break,
            }
        }
        resp
    }

    async fn send(&mut self, method: &str, uri: &str, body: Option<String>) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = &self.cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let req = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body)),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let resp = self.app.clone().oneshot(req).await.unwrap();

        if let Some(set_cookie) = resp.headers().get(header::SET_COOKIE) {
            let pair = set_cookie.to_str().unwrap().split(';').next().unwrap();
            self.cookie = Some(pair.to_string());
        }

        let status = resp.status();
        let location = resp
            .headers()
            .get(header::LOCATION)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();

        TestResponse {
            status,
            location,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}
