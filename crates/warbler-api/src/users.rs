use std::collections::HashSet;

use axum::{
    Extension, Form,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use tracing::{debug, info, warn};

use warbler_db::models::{MessageId, MessageRow, ProfileUpdate, UserCounts, UserId, UserRow};
use warbler_db::{Database, DbError};
use warbler_types::forms::{self, ChangePasswordForm, SearchQuery, UserEditForm};

use crate::auth::{AppState, access_unauthorized, hash_password, redirect, verify_password};
use crate::error::AppError;
use crate::session::{AuthContext, FlashLevel, SessionHandle};
use crate::views::{
    ChangePasswordTemplate, EditProfileTemplate, FollowListTemplate, LikesTemplate, MessageView,
    PageContext, UserShowTemplate, UserView, UsersIndexTemplate, render,
};

const PROFILE_MESSAGE_LIMIT: u32 = 100;

/// A user's page header plus what the viewer follows and likes.
struct Profile {
    user: UserRow,
    counts: UserCounts,
    following: HashSet<UserId>,
    liked: HashSet<MessageId>,
}

fn load_profile(db: &Database, user_id: UserId, viewer: Option<UserId>) -> Result<Profile, AppError> {
    let user = db.get_user_by_id(user_id)?.ok_or(AppError::NotFound)?;
    let counts = db.user_counts(user_id)?;
    let (following, liked) = match viewer {
        Some(v) => (db.follows().targets(v)?, db.likes().targets(v)?),
        None => (HashSet::new(), HashSet::new()),
    };
    Ok(Profile {
        user,
        counts,
        following,
        liked,
    })
}

/// Profile plus a message list, loaded off the async runtime.
async fn load_profile_with_messages<F>(
    state: &AppState,
    user_id: UserId,
    viewer: Option<UserId>,
    messages: F,
) -> Result<(Profile, Vec<MessageRow>), AppError>
where
    F: FnOnce(&Database) -> Result<Vec<MessageRow>, DbError> + Send + 'static,
{
    let db = state.clone();
    tokio::task::spawn_blocking(move || {
        let profile = load_profile(&db.db, user_id, viewer)?;
        let rows = messages(&db.db)?;
        Ok::<_, AppError>((profile, rows))
    })
    .await?
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
) -> Result<impl IntoResponse, AppError> {
    let users = state.db.search_users(query.term())?;
    let following = match auth.user_id() {
        Some(v) => state.db.follows().targets(v)?,
        None => HashSet::new(),
    };

    render(&UsersIndexTemplate {
        page: PageContext::new(&auth, &session),
        query: query.term().unwrap_or_default().to_string(),
        users: UserView::list(&users, auth.user_id(), &following),
    })
}

pub async fn show_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
) -> Result<impl IntoResponse, AppError> {
    let viewer = auth.user_id();
    let (profile, rows) = load_profile_with_messages(&state, user_id, viewer, move |db| {
        db.messages_by_user(user_id, PROFILE_MESSAGE_LIMIT)
    })
    .await?;

    render(&UserShowTemplate {
        page: PageContext::new(&auth, &session),
        user: UserView::new(&profile.user, viewer, &profile.following),
        counts: profile.counts,
        messages: MessageView::list(rows, viewer, &profile.liked),
    })
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Following,
    Followers,
}

async fn follow_list(
    state: AppState,
    user_id: UserId,
    auth: AuthContext,
    session: SessionHandle,
    direction: Direction,
) -> Result<Response, AppError> {
    let Some(viewer) = auth.user_id() else {
        return Ok(access_unauthorized(&session));
    };

    let db = state.clone();
    let (profile, users) = tokio::task::spawn_blocking(move || {
        let profile = load_profile(&db.db, user_id, Some(viewer))?;
        let users = match direction {
            Direction::Following => db.db.following_of(user_id)?,
            Direction::Followers => db.db.followers_of(user_id)?,
        };
        Ok::<_, AppError>((profile, users))
    })
    .await??;

    let heading = match direction {
        Direction::Following => "Following",
        Direction::Followers => "Followers",
    };

    Ok(render(&FollowListTemplate {
        page: PageContext::new(&auth, &session),
        user: UserView::new(&profile.user, Some(viewer), &profile.following),
        counts: profile.counts,
        heading,
        users: UserView::list(&users, Some(viewer), &profile.following),
    })?
    .into_response())
}

/// Any signed-in user may view anyone's list.
pub async fn show_following(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
) -> Result<Response, AppError> {
    follow_list(state, user_id, auth, session, Direction::Following).await
}

pub async fn show_followers(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
) -> Result<Response, AppError> {
    follow_list(state, user_id, auth, session, Direction::Followers).await
}

pub async fn show_likes(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
) -> Result<Response, AppError> {
    let Some(viewer) = auth.user_id() else {
        return Ok(access_unauthorized(&session));
    };

    let (profile, rows) = load_profile_with_messages(&state, user_id, Some(viewer), move |db| {
        db.liked_messages(user_id, PROFILE_MESSAGE_LIMIT)
    })
    .await?;

    Ok(render(&LikesTemplate {
        page: PageContext::new(&auth, &session),
        user: UserView::new(&profile.user, Some(viewer), &profile.following),
        counts: profile.counts,
        messages: MessageView::list(rows, Some(viewer), &profile.liked),
    })?
    .into_response())
}

pub async fn add_follow(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
) -> Result<Response, AppError> {
    let Some(me) = auth.user() else {
        return Ok(access_unauthorized(&session));
    };

    if user_id == me.id {
        session.flash(FlashLevel::Danger, "You cannot follow yourself.");
        return Ok(redirect(&format!("/users/{}", me.id)));
    }

    state.db.get_user_by_id(user_id)?.ok_or(AppError::NotFound)?;
    if state.db.follows().add(me.id, user_id)? {
        debug!("User {} followed {}", me.id, user_id);
    }

    Ok(redirect(&format!("/users/{}/following", me.id)))
}

pub async fn stop_following(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
) -> Result<Response, AppError> {
    let Some(me) = auth.user() else {
        return Ok(access_unauthorized(&session));
    };

    state.db.get_user_by_id(user_id)?.ok_or(AppError::NotFound)?;
    if state.db.follows().remove(me.id, user_id)? {
        debug!("User {} unfollowed {}", me.id, user_id);
    }

    Ok(redirect(&format!("/users/{}/following", me.id)))
}

/// Like the message if not yet liked, otherwise unlike it.
pub async fn toggle_like(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
) -> Result<Response, AppError> {
    let Some(me) = auth.user() else {
        return Ok(access_unauthorized(&session));
    };

    let message = state.db.get_message(message_id)?.ok_or(AppError::NotFound)?;
    if message.user_id == me.id {
        session.flash(FlashLevel::Danger, "You cannot like your own message.");
        return Ok(redirect("/"));
    }

    let added = state.db.likes().toggle(me.id, message.id)?;
    debug!("User {} {} message {}", me.id, if added { "liked" } else { "unliked" }, message.id);

    Ok(redirect("/"))
}

fn edit_template(page: PageContext, errors: Vec<String>, form: UserEditForm) -> EditProfileTemplate {
    EditProfileTemplate {
        page,
        errors,
        image_url: form.image_url().unwrap_or_default().to_string(),
        header_image_url: form.header_image_url().unwrap_or_default().to_string(),
        bio: form.bio().unwrap_or_default().to_string(),
        location: form.location().unwrap_or_default().to_string(),
        username: form.username,
        email: form.email,
    }
}

pub async fn edit_profile_form(
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
) -> Result<Response, AppError> {
    let Some(me) = auth.user() else {
        return Ok(access_unauthorized(&session));
    };

    let form = UserEditForm {
        username: me.username.clone(),
        email: me.email.clone(),
        image_url: Some(me.image_url.clone()),
        header_image_url: Some(me.header_image_url.clone()),
        bio: me.bio.clone(),
        location: me.location.clone(),
        password: String::new(),
    };

    Ok(render(&edit_template(PageContext::new(&auth, &session), vec![], form))?.into_response())
}

/// Edits require the current password.
pub async fn edit_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
    Form(form): Form<UserEditForm>,
) -> Result<Response, AppError> {
    let Some(me) = auth.user() else {
        return Ok(access_unauthorized(&session));
    };

    if let Err(errors) = forms::check(&form) {
        let page = PageContext::new(&auth, &session);
        return Ok(render(&edit_template(page, errors.messages(), form))?.into_response());
    }

    if !verify_password(&form.password, &me.password) {
        warn!("User {} failed password check on profile edit", me.id);
        session.flash(FlashLevel::Danger, "Wrong password, please try again.");
        return Ok(redirect("/"));
    }

    let update = ProfileUpdate {
        username: form.username.trim(),
        email: form.email.trim(),
        image_url: form.image_url(),
        header_image_url: form.header_image_url(),
        bio: form.bio(),
        location: form.location(),
    };

    match state.db.update_profile(me.id, &update) {
        Ok(()) => {
            info!("User {} updated their profile", me.id);
            session.flash(FlashLevel::Success, "Profile updated.");
            Ok(redirect(&format!("/users/{}", me.id)))
        }
        Err(DbError::Conflict(field)) => {
            session.flash(FlashLevel::Danger, format!("That {field} is already taken."));
            let page = PageContext::new(&auth, &session);
            Ok(render(&edit_template(page, vec![], form))?.into_response())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn change_password_form(
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
) -> Result<Response, AppError> {
    if auth.user().is_none() {
        return Ok(access_unauthorized(&session));
    }

    Ok(render(&ChangePasswordTemplate {
        page: PageContext::new(&auth, &session),
        errors: vec![],
    })?
    .into_response())
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
    Form(form): Form<ChangePasswordForm>,
) -> Result<Response, AppError> {
    let Some(me) = auth.user() else {
        return Ok(access_unauthorized(&session));
    };

    let errors = match forms::check(&form) {
        Ok(()) if verify_password(&form.current_password, &me.password) => {
            let hash = hash_password(&form.new_password)?;
            state.db.update_password(me.id, &hash)?;
            info!("User {} changed their password", me.id);
            session.flash(FlashLevel::Success, "Password updated.");
            return Ok(redirect(&format!("/users/{}", me.id)));
        }
        Ok(()) => {
            warn!("User {} failed password check on password change", me.id);
            session.flash(FlashLevel::Danger, "Incorrect current password.");
            vec![]
        }
        Err(errors) => errors.messages(),
    };

    Ok(render(&ChangePasswordTemplate {
        page: PageContext::new(&auth, &session),
        errors,
    })?
    .into_response())
}

/// Remove the signed-in account along with everything it owns.
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Extension(session): Extension<SessionHandle>,
) -> Result<Response, AppError> {
    let Some(me) = auth.user() else {
        return Ok(access_unauthorized(&session));
    };

    state.db.delete_user(me.id)?;
    session.logout();
    info!("User {} deleted their account", me.id);
    session.flash(FlashLevel::Info, "Your account has been deleted.");

    Ok(redirect("/signup"))
}
