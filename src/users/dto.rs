use serde::{Deserialize, Serialize};

use crate::users::repo_types::User;
use crate::users::validation::FieldErrors;

/// Body of the create and update forms.
///
/// Missing fields deserialize as empty strings so they surface as
/// validation messages instead of a rejected request.
#[derive(Debug, Default, Deserialize)]
pub struct UserForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub csrf_token: String,
}

/// Values echoed back into a re-rendered form. The password never is.
#[derive(Debug, Default, Serialize)]
pub struct FormValues {
    pub name: String,
    pub email: String,
}

impl From<&UserForm> for FormValues {
    fn from(form: &UserForm) -> Self {
        Self {
            name: form.name.clone(),
            email: form.email.clone(),
        }
    }
}

impl From<&User> for FormValues {
    fn from(user: &User) -> Self {
        Self {
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IndexPage<'a> {
    pub form: &'a FormValues,
    pub errors: &'a FieldErrors,
    pub csrf_token: &'a str,
    pub users: &'a [User],
}

#[derive(Debug, Serialize)]
pub struct UpdatePage<'a> {
    pub form: &'a FormValues,
    pub errors: &'a FieldErrors,
    pub csrf_token: &'a str,
    pub user: &'a User,
}
