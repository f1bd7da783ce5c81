//! HTML form payloads and their validation rules.
//!
//! Every field defaults to empty so a missing input reports as a validation
//! error instead of failing extraction.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::Deserialize;
use validator::{Validate, ValidationError, ValidationErrors};

pub const MESSAGE_MAX_LEN: u64 = 140;
pub const PASSWORD_MIN_LEN: u64 = 6;

fn required(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("required")
            .with_message(Cow::Borrowed("This field is required.")));
    }
    Ok(())
}

/// Required, and bounded in characters after trimming, matching what gets
/// stored.
fn message_text(value: &str) -> Result<(), ValidationError> {
    required(value)?;
    if value.trim().chars().count() as u64 > MESSAGE_MAX_LEN {
        return Err(ValidationError::new("length")
            .with_message(Cow::Borrowed("Message must be at most 140 characters.")));
    }
    Ok(())
}

/// Blank optional inputs count as not given.
fn optional(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct MessageForm {
    #[validate(custom(function = "message_text"))]
    pub text: String,
}

impl MessageForm {
    /// The text as validated and stored.
    pub fn text(&self) -> &str {
        self.text.trim()
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct UserAddForm {
    #[validate(custom(function = "required"))]
    pub username: String,
    #[validate(
        custom(function = "required"),
        email(message = "Invalid email address.")
    )]
    pub email: String,
    #[validate(length(min = 6, message = "Field must be at least 6 characters long."))]
    pub password: String,
    pub image_url: Option<String>,
}

impl UserAddForm {
    pub fn image_url(&self) -> Option<&str> {
        optional(&self.image_url)
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct LoginForm {
    #[validate(custom(function = "required"))]
    pub username: String,
    #[validate(length(min = 6, message = "Field must be at least 6 characters long."))]
    pub password: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct UserEditForm {
    #[validate(custom(function = "required"))]
    pub username: String,
    #[validate(
        custom(function = "required"),
        email(message = "Invalid email address.")
    )]
    pub email: String,
    pub image_url: Option<String>,
    pub header_image_url: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    /// Current password, required to confirm the edit.
    #[validate(
        custom(function = "required"),
        length(min = 6, message = "Field must be at least 6 characters long.")
    )]
    pub password: String,
}

impl UserEditForm {
    pub fn image_url(&self) -> Option<&str> {
        optional(&self.image_url)
    }

    pub fn header_image_url(&self) -> Option<&str> {
        optional(&self.header_image_url)
    }

    pub fn bio(&self) -> Option<&str> {
        optional(&self.bio)
    }

    pub fn location(&self) -> Option<&str> {
        optional(&self.location)
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct ChangePasswordForm {
    #[validate(
        custom(function = "required"),
        length(min = 6, message = "Field must be at least 6 characters long.")
    )]
    pub current_password: String,
    #[validate(
        custom(function = "required"),
        length(min = 6, message = "Field must be at least 6 characters long.")
    )]
    pub new_password: String,
    #[validate(
        custom(function = "required"),
        must_match(other = "new_password", message = "Passwords must match.")
    )]
    pub confirm_password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    pub q: Option<String>,
}

impl SearchQuery {
    pub fn term(&self) -> Option<&str> {
        optional(&self.q)
    }
}

/// Validation messages keyed by field name, in field-name order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormErrors(BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn field(&self, name: &str) -> &[String] {
        self.0.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Flattened "field: message" lines for display.
    pub fn messages(&self) -> Vec<String> {
        self.0
            .iter()
            .flat_map(|(field, msgs)| msgs.iter().map(move |m| format!("{field}: {m}")))
            .collect()
    }
}

impl From<ValidationErrors> for FormErrors {
    fn from(errors: ValidationErrors) -> Self {
        let mut map = BTreeMap::new();
        for (field, errs) in errors.field_errors() {
            let msgs = errs
                .iter()
                .map(|e| match &e.message {
                    Some(m) => m.to_string(),
                    None => e.code.to_string(),
                })
                .collect();
            map.insert(field.to_string(), msgs);
        }
        FormErrors(map)
    }
}

/// Validate `form`, collecting failures into `FormErrors`.
pub fn check<T: Validate>(form: &T) -> Result<(), FormErrors> {
    form.validate().map_err(FormErrors::from)
}
