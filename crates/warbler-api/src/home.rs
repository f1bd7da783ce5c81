use axum::{
    Extension,
    extract::State,
    response::{IntoResponse, Response},
};

use crate::auth::AppState;
use crate::error::AppError;
use crate::session::{AuthContext, SessionHandle};
use crate::views::{HomeAnonTemplate, HomeTemplate, MessageView, PageContext, UserView, render};

const TIMELINE_LIMIT: u32 = 100;

/// Landing page when logged out; otherwise the newest messages from the
/// user and everyone they follow.
pub async fn homepage(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
) -> Result<Response, AppError> {
    let Some(user) = auth.user() else {
        return Ok(render(&HomeAnonTemplate {
            page: PageContext::new(&auth, &session),
        })?
        .into_response());
    };

    // Run all blocking DB queries off the async runtime
    let db = state.clone();
    let uid = user.id;
    let (rows, counts, following, liked) = tokio::task::spawn_blocking(move || {
        let rows = db.db.timeline(uid, TIMELINE_LIMIT)?;
        let counts = db.db.user_counts(uid)?;
        let following = db.db.follows().targets(uid)?;
        let liked = db.db.likes().targets(uid)?;
        Ok::<_, AppError>((rows, counts, following, liked))
    })
    .await??;

    Ok(render(&HomeTemplate {
        page: PageContext::new(&auth, &session),
        user: UserView::new(user, Some(uid), &following),
        counts,
        messages: MessageView::list(rows, Some(uid), &liked),
    })?
    .into_response())
}

pub async fn not_found() -> AppError {
    AppError::NotFound
}
