//! Page templates and the view models they render.

use std::collections::HashSet;

use askama::Template;
use axum::response::Html;

use warbler_db::models::{MessageId, MessageRow, UserCounts, UserId, UserRow};

use crate::error::AppError;
use crate::session::{AuthContext, Flash, SessionHandle};

/// Shared by every page: navigation state and pending flashes.
pub struct PageContext {
    pub flashes: Vec<Flash>,
    pub logged_in: bool,
    pub current_user_id: UserId,
    pub current_username: String,
    pub current_image_url: String,
}

impl PageContext {
    /// Consumes the session's pending flashes.
    pub fn new(auth: &AuthContext, session: &SessionHandle) -> Self {
        let flashes = session.take_flashes();
        match auth.user() {
            Some(user) => Self {
                flashes,
                logged_in: true,
                current_user_id: user.id,
                current_username: user.username.clone(),
                current_image_url: user.image_url.clone(),
            },
            None => Self {
                flashes,
                logged_in: false,
                current_user_id: 0,
                current_username: String::new(),
                current_image_url: String::new(),
            },
        }
    }
}

pub struct MessageView {
    pub id: MessageId,
    pub text: String,
    pub timestamp: String,
    pub user_id: UserId,
    pub username: String,
    pub image_url: String,
    pub liked: bool,
    pub can_like: bool,
    pub can_delete: bool,
}

impl MessageView {
    pub fn new(row: MessageRow, viewer: Option<UserId>, liked: &HashSet<MessageId>) -> Self {
        let own = viewer == Some(row.user_id);
        Self {
            id: row.id,
            timestamp: row.timestamp.format("%d %B %Y").to_string(),
            liked: liked.contains(&row.id),
            can_like: viewer.is_some() && !own,
            can_delete: own,
            user_id: row.user_id,
            username: row.author_username,
            image_url: row.author_image_url,
            text: row.text,
        }
    }

    pub fn list(
        rows: Vec<MessageRow>,
        viewer: Option<UserId>,
        liked: &HashSet<MessageId>,
    ) -> Vec<Self> {
        rows.into_iter()
            .map(|row| Self::new(row, viewer, liked))
            .collect()
    }
}

pub struct UserView {
    pub id: UserId,
    pub username: String,
    pub image_url: String,
    pub header_image_url: String,
    pub bio: String,
    pub location: String,
    pub is_self: bool,
    pub is_followed: bool,
    pub can_follow: bool,
}

impl UserView {
    /// `following` is the set of ids the viewer follows.
    pub fn new(row: &UserRow, viewer: Option<UserId>, following: &HashSet<UserId>) -> Self {
        let is_self = viewer == Some(row.id);
        Self {
            id: row.id,
            username: row.username.clone(),
            image_url: row.image_url.clone(),
            header_image_url: row.header_image_url.clone(),
            bio: row.bio.clone().unwrap_or_default(),
            location: row.location.clone().unwrap_or_default(),
            is_self,
            is_followed: following.contains(&row.id),
            can_follow: viewer.is_some() && !is_self,
        }
    }

    pub fn list(rows: &[UserRow], viewer: Option<UserId>, following: &HashSet<UserId>) -> Vec<Self> {
        rows.iter().map(|row| Self::new(row, viewer, following)).collect()
    }
}

#[derive(Template)]
#[template(path = "home_anon.html")]
pub struct HomeAnonTemplate {
    pub page: PageContext,
}

#[derive(Template)]
#[template(path = "home.html")]
pub struct HomeTemplate {
    pub page: PageContext,
    pub user: UserView,
    pub counts: UserCounts,
    pub messages: Vec<MessageView>,
}

#[derive(Template)]
#[template(path = "signup.html")]
pub struct SignupTemplate {
    pub page: PageContext,
    pub errors: Vec<String>,
    pub username: String,
    pub email: String,
    pub image_url: String,
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub page: PageContext,
    pub errors: Vec<String>,
    pub username: String,
}

#[derive(Template)]
#[template(path = "users_index.html")]
pub struct UsersIndexTemplate {
    pub page: PageContext,
    pub query: String,
    pub users: Vec<UserView>,
}

#[derive(Template)]
#[template(path = "user_show.html")]
pub struct UserShowTemplate {
    pub page: PageContext,
    pub user: UserView,
    pub counts: UserCounts,
    pub messages: Vec<MessageView>,
}

#[derive(Template)]
#[template(path = "follow_list.html")]
pub struct FollowListTemplate {
    pub page: PageContext,
    pub user: UserView,
    pub counts: UserCounts,
    pub heading: &'static str,
    pub users: Vec<UserView>,
}

#[derive(Template)]
#[template(path = "user_likes.html")]
pub struct LikesTemplate {
    pub page: PageContext,
    pub user: UserView,
    pub counts: UserCounts,
    pub messages: Vec<MessageView>,
}

#[derive(Template)]
#[template(path = "user_edit.html")]
pub struct EditProfileTemplate {
    pub page: PageContext,
    pub errors: Vec<String>,
    pub username: String,
    pub email: String,
    pub image_url: String,
    pub header_image_url: String,
    pub bio: String,
    pub location: String,
}

#[derive(Template)]
#[template(path = "change_password.html")]
pub struct ChangePasswordTemplate {
    pub page: PageContext,
    pub errors: Vec<String>,
}

#[derive(Template)]
#[template(path = "message_new.html")]
pub struct NewMessageTemplate {
    pub page: PageContext,
    pub errors: Vec<String>,
    pub text: String,
}

#[derive(Template)]
#[template(path = "message_show.html")]
pub struct MessageShowTemplate {
    pub page: PageContext,
    pub message: MessageView,
}

pub fn render<T: Template>(template: &T) -> Result<Html<String>, AppError> {
    Ok(Html(template.render()?))
}
