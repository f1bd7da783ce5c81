use std::collections::HashSet;

use axum::{
    Extension, Form,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use warbler_db::models::MessageId;
use warbler_types::forms::{self, MessageForm};

use crate::auth::{AppState, access_unauthorized, redirect};
use crate::error::AppError;
use crate::session::{AuthContext, FlashLevel, SessionHandle};
use crate::views::{MessageShowTemplate, MessageView, NewMessageTemplate, PageContext, render};

pub async fn new_message_form(
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
) -> Result<Response, AppError> {
    if auth.user().is_none() {
        return Ok(access_unauthorized(&session));
    }

    Ok(render(&NewMessageTemplate {
        page: PageContext::new(&auth, &session),
        errors: vec![],
        text: String::new(),
    })?
    .into_response())
}

/// The owner is always the signed-in user; the form carries only text.
pub async fn create_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
    Form(form): Form<MessageForm>,
) -> Result<Response, AppError> {
    let Some(user) = auth.user() else {
        warn!("Anonymous message post rejected");
        return Ok(access_unauthorized(&session));
    };

    if let Err(errors) = forms::check(&form) {
        return Ok(render(&NewMessageTemplate {
            page: PageContext::new(&auth, &session),
            errors: errors.messages(),
            text: form.text,
        })?
        .into_response());
    }

    let message = state.db.insert_message(user.id, form.text())?;
    info!("User {} posted message {}", user.id, message.id);

    Ok(redirect(&format!("/users/{}", user.id)))
}

pub async fn show_message(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
) -> Result<impl IntoResponse, AppError> {
    let message = state.db.get_message(message_id)?.ok_or(AppError::NotFound)?;

    let liked = match auth.user_id() {
        Some(uid) => state.db.likes().targets(uid)?,
        None => HashSet::new(),
    };

    render(&MessageShowTemplate {
        page: PageContext::new(&auth, &session),
        message: MessageView::new(message, auth.user_id(), &liked),
    })
}

/// Only the owner may delete; anyone else leaves the row untouched.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
) -> Result<Response, AppError> {
    let Some(user) = auth.user() else {
        return Ok(access_unauthorized(&session));
    };

    let message = state.db.get_message(message_id)?.ok_or(AppError::NotFound)?;

    if message.user_id != user.id {
        warn!("User {} tried to delete message {} owned by {}", user.id, message.id, message.user_id);
        return Ok(access_unauthorized(&session));
    }

    state.db.delete_message(message.id)?;
    info!("User {} deleted message {}", user.id, message.id);
    session.flash(FlashLevel::Success, "Message deleted");

    Ok(redirect(&format!("/users/{}", user.id)))
}
