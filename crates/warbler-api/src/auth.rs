use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{
    Extension, Form,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use warbler_db::models::{NewUser, UserRow};
use warbler_db::{Database, DbError};
use warbler_types::forms::{self, LoginForm, UserAddForm};

use crate::error::AppError;
use crate::session::{AuthContext, FlashLevel, SessionHandle, SessionStore};
use crate::views::{LoginTemplate, PageContext, SignupTemplate, render};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub sessions: SessionStore,
}

impl AppStateInner {
    pub fn new(db: Database) -> AppState {
        Self::with_sessions(db, SessionStore::new())
    }

    pub fn with_sessions(db: Database, sessions: SessionStore) -> AppState {
        Arc::new(Self { db, sessions })
    }
}

// -- Helpers shared by handlers --

pub fn redirect(to: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, to.to_string())]).into_response()
}

/// Flash "Access unauthorized." and send the visitor home.
pub fn access_unauthorized(session: &SessionHandle) -> Response {
    session.flash(FlashLevel::Danger, "Access unauthorized.");
    redirect("/")
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Password(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Hash the password and create the user. Duplicate usernames or emails
/// come back as `DbError::Conflict` with nothing written.
pub fn register_user(
    db: &Database,
    username: &str,
    email: &str,
    password: &str,
    image_url: Option<&str>,
) -> Result<UserRow, AppError> {
    let password_hash = hash_password(password)?;
    let user = db.create_user(&NewUser {
        username,
        email,
        password_hash: &password_hash,
        image_url,
    })?;
    Ok(user)
}

/// Look up `username` and check `password`. Unknown users and wrong
/// passwords both yield `None`.
pub fn authenticate(db: &Database, username: &str, password: &str) -> Result<Option<UserRow>, AppError> {
    let user = db
        .get_user_by_username(username)?
        .filter(|user| verify_password(password, &user.password));
    Ok(user)
}

// -- Handlers --

pub async fn signup_form(
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
) -> Result<impl IntoResponse, AppError> {
    render(&SignupTemplate {
        page: PageContext::new(&auth, &session),
        errors: vec![],
        username: String::new(),
        email: String::new(),
        image_url: String::new(),
    })
}

pub async fn signup(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
    Form(form): Form<UserAddForm>,
) -> Result<Response, AppError> {
    let errors = match forms::check(&form) {
        Ok(()) => {
            let result = register_user(
                &state.db,
                form.username.trim(),
                form.email.trim(),
                &form.password,
                form.image_url(),
            );
            match result {
                Ok(user) => {
                    info!("New user {} ({})", user.username, user.id);
                    session.login(user.id);
                    return Ok(redirect("/"));
                }
                Err(AppError::Db(DbError::Conflict(field))) => {
                    warn!("Signup rejected: {} already taken", field);
                    session.flash(FlashLevel::Danger, format!("That {field} is already taken."));
                    vec![]
                }
                Err(e) => return Err(e),
            }
        }
        Err(errors) => errors.messages(),
    };

    let image_url = form.image_url().unwrap_or_default().to_string();
    Ok(render(&SignupTemplate {
        page: PageContext::new(&auth, &session),
        errors,
        username: form.username,
        email: form.email,
        image_url,
    })?
    .into_response())
}

pub async fn login_form(
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
) -> Result<impl IntoResponse, AppError> {
    render(&LoginTemplate {
        page: PageContext::new(&auth, &session),
        errors: vec![],
        username: String::new(),
    })
}

pub async fn login(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let errors = match forms::check(&form) {
        Ok(()) => match authenticate(&state.db, form.username.trim(), &form.password)? {
            Some(user) => {
                info!("User {} logged in", user.id);
                session.login(user.id);
                session.flash(FlashLevel::Success, format!("Hello, {}!", user.username));
                return Ok(redirect("/"));
            }
            None => {
                warn!("Failed login for {:?}", form.username);
                session.flash(FlashLevel::Danger, "Invalid credentials.");
                vec![]
            }
        },
        Err(errors) => errors.messages(),
    };

    Ok(render(&LoginTemplate {
        page: PageContext::new(&auth, &session),
        errors,
        username: form.username,
    })?
    .into_response())
}

pub async fn logout(Extension(session): Extension<SessionHandle>) -> Response {
    session.logout();
    session.flash(FlashLevel::Success, "You have successfully logged out.");
    redirect("/login")
}
