use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::users::dto::UserForm;

pub const NAME_MAX: usize = 80;
pub const EMAIL_MAX: usize = 120;
pub const PASSWORD_MIN: usize = 8;
pub const PASSWORD_MAX: usize = 128;

const REQUIRED: &str = "This field is required.";

/// Per-field error messages, keyed by form field name.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<&'static str, String>);

impl FieldErrors {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.add(field, message);
        errors
    }

    #[cfg(test)]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Fields that passed validation; name and email are trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidUser {
    pub name: String,
    pub email: String,
    pub password: String,
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(
            r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$"
        )
        .unwrap();
    }
    let Some((local, _)) = email.split_once('@') else {
        return false;
    };
    EMAIL_RE.is_match(email)
        && !local.starts_with('.')
        && !local.ends_with('.')
        && !local.contains("..")
}

fn too_long(max: usize) -> String {
    format!("Field cannot be longer than {max} characters.")
}

pub fn validate(form: &UserForm) -> Result<ValidUser, FieldErrors> {
    let mut errors = FieldErrors::default();

    let name = form.name.trim();
    if name.is_empty() {
        errors.add("name", REQUIRED);
    } else if name.chars().count() > NAME_MAX {
        errors.add("name", too_long(NAME_MAX));
    }

    let email = form.email.trim();
    if email.is_empty() {
        errors.add("email", REQUIRED);
    } else if !is_valid_email(email) {
        errors.add("email", "Invalid email address.");
    } else if email.chars().count() > EMAIL_MAX {
        errors.add("email", too_long(EMAIL_MAX));
    }

    let password = form.password.as_str();
    let password_len = password.chars().count();
    if password.trim().is_empty() {
        errors.add("password", REQUIRED);
    } else if !(PASSWORD_MIN..=PASSWORD_MAX).contains(&password_len) {
        errors.add(
            "password",
            format!("Field must be between {PASSWORD_MIN} and {PASSWORD_MAX} characters long."),
        );
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(ValidUser {
        name: name.to_string(),
        email: email.to_string(),
        password: password.to_string(),
    })
}
