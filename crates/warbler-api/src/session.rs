//! Server-side sessions keyed by an opaque cookie.
//!
//! The session holds the signed-in user id under [`CURR_USER_KEY`] and the
//! pending flash messages. `load_session` resolves both into request
//! extensions: a [`SessionHandle`] for writes and an [`AuthContext`] naming
//! the current user.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::debug;
use uuid::Uuid;

use warbler_db::models::{UserId, UserRow};

use crate::auth::AppState;
use crate::error::AppError;

/// Session entry holding the authenticated user id.
pub const CURR_USER_KEY: &str = "curr_user";

pub const SESSION_COOKIE: &str = "warbler_session";

const SESSION_TTL: Duration = Duration::from_secs(14 * 24 * 60 * 60);
const MAX_SESSIONS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashLevel {
    Success,
    Info,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    pub level: FlashLevel,
    pub text: String,
}

impl Flash {
    /// CSS alert class suffix.
    pub fn category(&self) -> &'static str {
        match self.level {
            FlashLevel::Success => "success",
            FlashLevel::Info => "info",
            FlashLevel::Danger => "danger",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    values: HashMap<String, i64>,
    flashes: Vec<Flash>,
    expires_at: SystemTime,
}

impl Session {
    fn new(ttl: Duration) -> Self {
        Self {
            values: HashMap::new(),
            flashes: Vec::new(),
            expires_at: SystemTime::now() + ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.values.get(key).copied()
    }

    pub fn insert(&mut self, key: &str, value: i64) {
        self.values.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<i64> {
        self.values.remove(key)
    }

    fn is_valid(&self) -> bool {
        SystemTime::now() < self.expires_at
    }

    fn touch(&mut self, ttl: Duration) {
        self.expires_at = SystemTime::now() + ttl;
    }

    fn is_empty(&self) -> bool {
        self.values.is_empty() && self.flashes.is_empty()
    }
}

/// In-process session storage shared by every request.
///
/// Sessions expire `ttl` after their last use. Expired entries are dropped
/// when looked up, and once the store grows past `max_sessions` it purges
/// expired entries and then evicts the least recently used ones.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<Uuid, Session>>>,
    ttl: Duration,
    max_sessions: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_limits(SESSION_TTL, MAX_SESSIONS)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(ttl: Duration, max_sessions: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            max_sessions,
        }
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        live(&mut self.lock(), id).is_some()
    }

    pub fn load(&self, id: &Uuid) -> Option<Session> {
        live(&mut self.lock(), id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Mutate the session, creating it on first write. Sessions left with
    /// no values and no flashes are removed.
    pub fn update<F, T>(&self, id: Uuid, f: F) -> T
    where
        F: FnOnce(&mut Session) -> T,
    {
        let mut sessions = self.lock();
        live(&mut sessions, &id);
        let session = sessions.entry(id).or_insert_with(|| Session::new(self.ttl));
        session.touch(self.ttl);
        let out = f(session);
        if session.is_empty() {
            sessions.remove(&id);
        }
        self.evict(&mut sessions);
        out
    }

    /// Move the session under `old` to a fresh id, returning the new id.
    fn rotate(&self, old: Uuid) -> Uuid {
        let mut sessions = self.lock();
        live(&mut sessions, &old);
        let mut session = sessions.remove(&old).unwrap_or_else(|| Session::new(self.ttl));
        session.touch(self.ttl);
        let id = Uuid::new_v4();
        sessions.insert(id, session);
        self.evict(&mut sessions);
        id
    }

    fn evict(&self, sessions: &mut HashMap<Uuid, Session>) {
        if sessions.len() <= self.max_sessions {
            return;
        }
        sessions.retain(|_, s| s.is_valid());

        let excess = sessions.len().saturating_sub(self.max_sessions);
        if excess > 0 {
            let mut by_age: Vec<(SystemTime, Uuid)> =
                sessions.iter().map(|(id, s)| (s.expires_at, *id)).collect();
            by_age.sort_unstable();
            for (_, id) in by_age.into_iter().take(excess) {
                sessions.remove(&id);
            }
            debug!("Evicted {} sessions over the {} cap", excess, self.max_sessions);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Session>> {
        // Recover the map after a panicking writer.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The live session under `id`, dropping it if it has expired.
fn live<'a>(sessions: &'a mut HashMap<Uuid, Session>, id: &Uuid) -> Option<&'a mut Session> {
    if sessions.get(id).is_some_and(|s| !s.is_valid()) {
        sessions.remove(id);
    }
    sessions.get_mut(id)
}

/// The current request's session. Clones share the id, so a rotation made
/// by a handler is seen by `load_session` when it writes the cookie.
#[derive(Clone)]
pub struct SessionHandle {
    id: Arc<Mutex<Uuid>>,
    store: SessionStore,
}

impl SessionHandle {
    pub fn new(id: Uuid, store: SessionStore) -> Self {
        Self {
            id: Arc::new(Mutex::new(id)),
            store,
        }
    }

    pub fn id(&self) -> Uuid {
        *self.id.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.store.load(&self.id()).and_then(|s| s.get(CURR_USER_KEY))
    }

    /// Sign `user_id` in under a fresh session id. Pending flashes carry over.
    pub fn login(&self, user_id: UserId) {
        let mut id = self.id.lock().unwrap_or_else(PoisonError::into_inner);
        *id = self.store.rotate(*id);
        self.store.update(*id, |s| s.insert(CURR_USER_KEY, user_id));
    }

    pub fn logout(&self) {
        let id = self.id();
        if self.store.contains(&id) {
            self.store.update(id, |s| s.remove(CURR_USER_KEY));
        }
    }

    pub fn flash(&self, level: FlashLevel, text: impl Into<String>) {
        let flash = Flash {
            level,
            text: text.into(),
        };
        self.store.update(self.id(), |s| s.flashes.push(flash));
    }

    /// Drain pending flashes for display.
    pub fn take_flashes(&self) -> Vec<Flash> {
        let id = self.id();
        if !self.store.contains(&id) {
            return Vec::new();
        }
        self.store.update(id, |s| std::mem::take(&mut s.flashes))
    }
}

/// Who is making the request. `user` is `None` when logged out.
#[derive(Clone, Default)]
pub struct AuthContext {
    user: Option<UserRow>,
}

impl AuthContext {
    pub fn new(user: Option<UserRow>) -> Self {
        Self { user }
    }

    pub fn user(&self) -> Option<&UserRow> {
        self.user.as_ref()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user.as_ref().map(|u| u.id)
    }
}

/// Resolve the session cookie into `SessionHandle` and `AuthContext`
/// extensions. A cookie is issued once a new session holds state or after
/// login moves it to a fresh id, and cleared once the session is gone.
pub async fn load_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let existing = jar
        .get(SESSION_COOKIE)
        .and_then(|c| c.value().parse::<Uuid>().ok())
        .filter(|id| state.sessions.contains(id));

    let id = existing.unwrap_or_else(Uuid::new_v4);
    let session = SessionHandle::new(id, state.sessions.clone());

    let user = match session.user_id() {
        Some(user_id) => {
            let user = state.db.get_user_by_id(user_id)?;
            if user.is_none() {
                debug!("Session {} names deleted user {}", id, user_id);
                session.logout();
            }
            user
        }
        None => None,
    };

    req.extensions_mut().insert(AuthContext::new(user));
    req.extensions_mut().insert(session.clone());

    let response = next.run(req).await;

    let current = session.id();
    let stored = state.sessions.contains(&current);
    if existing != Some(current) && stored {
        let cookie = Cookie::build((SESSION_COOKIE, current.to_string()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax);
        return Ok((jar.add(cookie), response).into_response());
    }
    if existing.is_some() && !stored {
        let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
        return Ok((jar, response).into_response());
    }

    Ok(response)
}
