use anyhow::Context;
use axum::{
    extract::{rejection::FormRejection, Path, State},
    http::{header::SET_COOKIE, HeaderValue},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Form, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::extractors::CsrfCookie,
    error::AppError,
    state::AppState,
    users::{
        dto::{FormValues, IndexPage, UpdatePage, UserForm},
        repo_types::{StoreError, User},
        sanitize::clean,
        validation::{validate, FieldErrors, ValidUser},
    },
    views,
};

const CSRF_INVALID: &str = "The CSRF token is missing or invalid.";
const DUPLICATE_EMAIL: &str = "This email address is already registered.";
const REQUIRED: &str = "This field is required.";

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index).post(create_user))
        .route("/update/:id", get(edit_user).post(update_user))
        // GET kept for link compatibility; not CSRF-guarded
        .route("/delete/:id", get(delete_user))
}

// --- handlers ---

#[instrument(skip(state, cookie))]
pub async fn index(
    State(state): State<AppState>,
    CsrfCookie(cookie): CsrfCookie,
) -> Result<Response, AppError> {
    render_index(
        &state,
        cookie.as_deref(),
        &FormValues::default(),
        &FieldErrors::default(),
    )
    .await
}

#[instrument(skip(state, cookie, form))]
pub async fn create_user(
    State(state): State<AppState>,
    CsrfCookie(cookie): CsrfCookie,
    form: Result<Form<UserForm>, FormRejection>,
) -> Result<Response, AppError> {
    let form = form_or_default(form);
    let valid = match check_submission(&state, cookie.as_deref(), &form) {
        Ok(v) => v,
        Err(errors) => {
            warn!(?errors, "create form rejected");
            return render_index(&state, cookie.as_deref(), &(&form).into(), &errors).await;
        }
    };

    let hash = state.hasher.hash_blocking(valid.password).await?;
    match state.store.create(&valid.name, &valid.email, &hash).await {
        Ok(user) => {
            info!(user_id = user.id, "user created");
            Ok(Redirect::to("/").into_response())
        }
        Err(StoreError::DuplicateEmail) => {
            warn!("create rejected: email already registered");
            let errors = FieldErrors::single("email", DUPLICATE_EMAIL);
            render_index(&state, cookie.as_deref(), &(&form).into(), &errors).await
        }
        Err(e) => Err(e.into()),
    }
}

#[instrument(skip(state, cookie))]
pub async fn edit_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    CsrfCookie(cookie): CsrfCookie,
) -> Result<Response, AppError> {
    let user = state.store.get(parse_id(&id)?).await?;
    render_update(
        &state,
        cookie.as_deref(),
        &user,
        &(&user).into(),
        &FieldErrors::default(),
    )
}

#[instrument(skip(state, cookie, form))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    CsrfCookie(cookie): CsrfCookie,
    form: Result<Form<UserForm>, FormRejection>,
) -> Result<Response, AppError> {
    let user = state.store.get(parse_id(&id)?).await?;
    let form = form_or_default(form);

    let valid = match check_submission(&state, cookie.as_deref(), &form) {
        Ok(v) => v,
        Err(errors) => {
            warn!(user_id = user.id, ?errors, "update form rejected");
            return render_update(&state, cookie.as_deref(), &user, &(&form).into(), &errors);
        }
    };

    let hash = state.hasher.hash_blocking(valid.password).await?;
    match state
        .store
        .update(user.id, &valid.name, &valid.email, &hash)
        .await
    {
        Ok(updated) => {
            info!(user_id = updated.id, "user updated");
            Ok(Redirect::to("/").into_response())
        }
        Err(StoreError::DuplicateEmail) => {
            warn!(user_id = user.id, "update rejected: email already registered");
            let errors = FieldErrors::single("email", DUPLICATE_EMAIL);
            render_update(&state, cookie.as_deref(), &user, &(&form).into(), &errors)
        }
        Err(e) => Err(e.into()),
    }
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    state.store.delete(id).await?;
    info!(user_id = id, "user deleted");
    Ok(Redirect::to("/").into_response())
}

// --- helpers ---

/// Route ids are non-negative integers; anything else names no user.
fn parse_id(raw: &str) -> Result<i64, AppError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::NotFound);
    }
    raw.parse().map_err(|_| AppError::NotFound)
}

/// A body that is not a urlencoded form counts as an empty submission.
fn form_or_default(form: Result<Form<UserForm>, FormRejection>) -> UserForm {
    match form {
        Ok(Form(form)) => form,
        Err(rejection) => {
            warn!(error = %rejection, "unreadable form body");
            UserForm::default()
        }
    }
}

/// CSRF check, field validation, then sanitization of the text fields.
fn check_submission(
    state: &AppState,
    cookie: Option<&str>,
    form: &UserForm,
) -> Result<ValidUser, FieldErrors> {
    let csrf_ok = state.csrf.verify(cookie, &form.csrf_token);
    let mut valid = match validate(form) {
        Ok(valid) if csrf_ok => valid,
        Ok(_) => return Err(FieldErrors::single("csrf_token", CSRF_INVALID)),
        Err(mut errors) => {
            if !csrf_ok {
                errors.add("csrf_token", CSRF_INVALID);
            }
            return Err(errors);
        }
    };

    valid.name = clean(&valid.name).trim().to_string();
    valid.email = clean(&valid.email).trim().to_string();
    if valid.name.is_empty() {
        return Err(FieldErrors::single("name", REQUIRED));
    }
    Ok(valid)
}

async fn render_index(
    state: &AppState,
    cookie: Option<&str>,
    form: &FormValues,
    errors: &FieldErrors,
) -> Result<Response, AppError> {
    let users = state.store.list().await?;
    let issued = state.csrf.issue(cookie);
    let html = state.views.render(
        views::INDEX,
        &IndexPage {
            form,
            errors,
            csrf_token: &issued.token,
            users: &users,
        },
    )?;
    with_cookie(html, issued.set_cookie)
}

fn render_update(
    state: &AppState,
    cookie: Option<&str>,
    user: &User,
    form: &FormValues,
    errors: &FieldErrors,
) -> Result<Response, AppError> {
    let issued = state.csrf.issue(cookie);
    let html = state.views.render(
        views::UPDATE,
        &UpdatePage {
            form,
            errors,
            csrf_token: &issued.token,
            user,
        },
    )?;
    with_cookie(html, issued.set_cookie)
}

fn with_cookie(html: Html<String>, set_cookie: Option<String>) -> Result<Response, AppError> {
    let mut res = html.into_response();
    if let Some(cookie) = set_cookie {
        let value = HeaderValue::from_str(&cookie).context("csrf cookie header")?;
        res.headers_mut().append(SET_COOKIE, value);
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use async_trait::async_trait;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };
    use tower::ServiceExt;

    use crate::app::build_app;
    use crate::auth::password::HashedPassword;
    use crate::users::{memory::MemoryUserStore, repo::UserStore};

    struct Page {
        status: StatusCode,
        location: Option<String>,
        body: String,
    }

    /// Minimal cookie-keeping client over the in-process router.
    struct Browser {
        state: AppState,
        app: Router,
        cookie: Option<String>,
    }

    impl Browser {
        fn new() -> Self {
            Self::with_state(AppState::fake())
        }

        fn with_state(state: AppState) -> Self {
            let app = build_app(state.clone());
            Self {
                state,
                app,
                cookie: None,
            }
        }

        async fn send(&mut self, mut req: Request<Body>) -> Page {
            if let Some(c) = &self.cookie {
                req.headers_mut()
                    .insert(header::COOKIE, HeaderValue::from_str(c).unwrap());
            }
            let res = self.app.clone().oneshot(req).await.unwrap();
            if let Some(set) = res.headers().get(header::SET_COOKIE) {
                let pair = set.to_str().unwrap().split(';').next().unwrap();
                self.cookie = Some(pair.to_string());
            }
            let status = res.status();
            let location = res
                .headers()
                .get(header::LOCATION)
                .map(|v| v.to_str().unwrap().to_string());
            let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
                .await
                .unwrap();
            Page {
                status,
                location,
                body: String::from_utf8(bytes.to_vec()).unwrap(),
            }
        }

        async fn get(&mut self, uri: &str) -> Page {
            self.send(Request::get(uri).body(Body::empty()).unwrap())
                .await
        }

        async fn post(&mut self, uri: &str, fields: &[(&str, &str)]) -> Page {
            let body = fields
                .iter()
                .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            let req = Request::post(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap();
            self.send(req).await
        }

        /// Loads `form_uri` for a token, then submits the user form to `action`.
        async fn submit(
            &mut self,
            form_uri: &str,
            action: &str,
            name: &str,
            email: &str,
            password: &str,
        ) -> Page {
            let page = self.get(form_uri).await;
            let token = csrf_token(&page.body);
            self.post(
                action,
                &[
                    ("name", name),
                    ("email", email),
                    ("password", password),
                    ("csrf_token", &token),
                ],
            )
            .await
        }
    }

    fn encode(s: &str) -> String {
        s.bytes()
            .map(|b| {
                if b.is_ascii_alphanumeric() {
                    (b as char).to_string()
                } else {
                    format!("%{b:02X}")
                }
            })
            .collect()
    }

    fn csrf_token(body: &str) -> String {
        let marker = r#"name="csrf_token" value=""#;
        let start = body.find(marker).expect("form has csrf field") + marker.len();
        let end = body[start..].find('"').unwrap();
        body[start..start + end].to_string()
    }

    #[tokio::test]
    async fn create_list_then_delete_end_to_end() {
        let mut b = Browser::new();
        let res = b
            .submit("/", "/", "Ann", "ann@example.com", "longenoughpw")
            .await;
        assert_eq!(res.status, StatusCode::SEE_OTHER);
        assert_eq!(res.location.as_deref(), Some("/"));

        let list = b.get("/").await;
        assert_eq!(list.status, StatusCode::OK);
        assert!(list.body.contains("<td>Ann</td>"));
        assert!(list.body.contains("<td>ann@example.com</td>"));

        let users = b.state.store.list().await.unwrap();
        assert_eq!(users.len(), 1);
        let id = users[0].id;
        assert!(b
            .state
            .hasher
            .verify("longenoughpw", &users[0].password_hash)
            .unwrap());

        let res = b.get(&format!("/delete/{id}")).await;
        assert_eq!(res.status, StatusCode::SEE_OTHER);
        assert!(b.state.store.list().await.unwrap().is_empty());
        assert!(b.get("/").await.body.contains("No users yet."));
    }

    #[tokio::test]
    async fn invalid_submission_rerenders_without_mutation() {
        let mut b = Browser::new();
        let too_long = "p".repeat(129);
        for (name, email, password) in [
            ("", "ann@example.com", "longenoughpw"),
            ("Ann", "not-an-email", "longenoughpw"),
            ("Ann", "ann@example.com", "short12"),
            ("Ann", "ann@example.com", too_long.as_str()),
        ] {
            let res = b.submit("/", "/", name, email, password).await;
            assert_eq!(res.status, StatusCode::OK);
            assert!(res.body.contains(r#"<span class="error">"#));
            assert!(!res.body.contains(password));
        }
        assert!(b.state.store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn submission_without_valid_csrf_token_is_rejected() {
        let mut b = Browser::new();
        let res = b
            .post(
                "/",
                &[
                    ("name", "Ann"),
                    ("email", "ann@example.com"),
                    ("password", "longenoughpw"),
                ],
            )
            .await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.body.contains(CSRF_INVALID));

        b.get("/").await; // cookie now set, but the token is forged
        let res = b
            .post(
                "/",
                &[
                    ("name", "Ann"),
                    ("email", "ann@example.com"),
                    ("password", "longenoughpw"),
                    ("csrf_token", "deadbeef.00"),
                ],
            )
            .await;
        assert!(res.body.contains(CSRF_INVALID));
        assert!(b.state.store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_email_is_an_inline_error() {
        let mut b = Browser::new();
        b.submit("/", "/", "Ann", "ann@example.com", "longenoughpw")
            .await;
        let res = b
            .submit("/", "/", "Other", "ann@example.com", "longenoughpw")
            .await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.body.contains(DUPLICATE_EMAIL));
        assert_eq!(b.state.store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn markup_is_sanitized_before_storage() {
        let mut b = Browser::new();
        let res = b
            .submit(
                "/",
                "/",
                "<script>alert(1)</script>Bob",
                "bob@example.com",
                "longenoughpw",
            )
            .await;
        assert_eq!(res.status, StatusCode::SEE_OTHER);
        let users = b.state.store.list().await.unwrap();
        assert_eq!(users[0].name, "Bob");

        let res = b
            .submit(
                "/",
                "/",
                "<script>alert(1)</script>",
                "eve@example.com",
                "longenoughpw",
            )
            .await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.body.contains(REQUIRED));
        assert_eq!(b.state.store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_changes_only_the_target_row() {
        let mut b = Browser::new();
        b.submit("/", "/", "Ann", "ann@example.com", "longenoughpw")
            .await;
        b.submit("/", "/", "Bob", "bob@example.com", "longenoughpw")
            .await;
        let before = b.state.store.list().await.unwrap();
        let (ann, bob) = (&before[0], &before[1]);

        let edit = b.get(&format!("/update/{}", ann.id)).await;
        assert_eq!(edit.status, StatusCode::OK);
        assert!(edit.body.contains(r#"value="Ann""#));
        assert!(edit.body.contains(r#"value="ann@example.com""#));

        let uri = format!("/update/{}", ann.id);
        let res = b
            .submit(&uri, &uri, "Anna", "anna@example.com", "brandnewpassword")
            .await;
        assert_eq!(res.status, StatusCode::SEE_OTHER);

        let updated = b.state.store.get(ann.id).await.unwrap();
        assert_eq!(updated.name, "Anna");
        assert_eq!(updated.email, "anna@example.com");
        assert!(b
            .state
            .hasher
            .verify("brandnewpassword", &updated.password_hash)
            .unwrap());
        assert_eq!(&b.state.store.get(bob.id).await.unwrap(), bob);
    }

    #[tokio::test]
    async fn update_rejects_invalid_and_colliding_input() {
        let mut b = Browser::new();
        b.submit("/", "/", "Ann", "ann@example.com", "longenoughpw")
            .await;
        b.submit("/", "/", "Bob", "bob@example.com", "longenoughpw")
            .await;
        let ann = b.state.store.list().await.unwrap()[0].clone();
        let uri = format!("/update/{}", ann.id);

        let res = b.submit(&uri, &uri, "Ann", "bad", "longenoughpw").await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.body.contains("Invalid email address."));

        let res = b
            .submit(&uri, &uri, "Ann", "bob@example.com", "longenoughpw")
            .await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.body.contains(DUPLICATE_EMAIL));

        assert_eq!(b.state.store.get(ann.id).await.unwrap(), ann);
    }

    #[tokio::test]
    async fn unknown_users_and_paths_are_404() {
        let mut b = Browser::new();
        for uri in ["/update/42", "/delete/42", "/update/abc", "/delete/-1", "/nope"] {
            let res = b.get(uri).await;
            assert_eq!(res.status, StatusCode::NOT_FOUND, "{uri}");
            assert!(res.body.contains("404"));
        }
        let token = csrf_token(&b.get("/").await.body);
        let res = b
            .post(
                "/update/42",
                &[
                    ("name", "Ann"),
                    ("email", "ann@example.com"),
                    ("password", "longenoughpw"),
                    ("csrf_token", &token),
                ],
            )
            .await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn non_form_body_counts_as_empty_submission() {
        let mut b = Browser::new();
        b.submit("/", "/", "Ann", "ann@example.com", "longenoughpw")
            .await;
        let ann = b.state.store.list().await.unwrap()[0].clone();
        b.get("/").await;

        for uri in ["/".to_string(), format!("/update/{}", ann.id)] {
            let req = Request::post(uri.as_str())
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"name":"Eve","email":"eve@example.com","password":"longenoughpw"}"#,
                ))
                .unwrap();
            let res = b.send(req).await;
            assert_eq!(res.status, StatusCode::OK, "{uri}");
            assert!(res.body.contains("<html"), "{uri}");
            assert!(res.body.contains(REQUIRED), "{uri}");
            assert!(res.body.contains(CSRF_INVALID), "{uri}");
        }

        assert_eq!(b.state.store.list().await.unwrap(), vec![ann]);
    }

    /// Memory store that answers with a pool timeout while `broken` is set.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryUserStore,
        broken: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl UserStore for FlakyStore {
        async fn list(&self) -> Result<Vec<User>, StoreError> {
            self.check()?;
            self.inner.list().await
        }

        async fn create(
            &self,
            name: &str,
            email: &str,
            password_hash: &HashedPassword,
        ) -> Result<User, StoreError> {
            self.check()?;
            self.inner.create(name, email, password_hash).await
        }

        async fn get(&self, id: i64) -> Result<User, StoreError> {
            self.check()?;
            self.inner.get(id).await
        }

        async fn update(
            &self,
            id: i64,
            name: &str,
            email: &str,
            password_hash: &HashedPassword,
        ) -> Result<User, StoreError> {
            self.check()?;
            self.inner.update(id, name, email, password_hash).await
        }

        async fn delete(&self, id: i64) -> Result<(), StoreError> {
            self.check()?;
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn store_failure_serves_500_page_and_later_requests_recover() {
        let store = Arc::new(FlakyStore::default());
        let mut state = AppState::fake();
        state.store = store.clone();
        let mut b = Browser::with_state(state);

        b.submit("/", "/", "Ann", "ann@example.com", "longenoughpw")
            .await;
        let token = csrf_token(&b.get("/").await.body);

        store.broken.store(true, Ordering::SeqCst);
        let res = b.get("/").await;
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.body.contains("500 - Something went wrong"));
        assert!(!res.body.contains("timed out"));

        let res = b
            .post(
                "/",
                &[
                    ("name", "Bob"),
                    ("email", "bob@example.com"),
                    ("password", "longenoughpw"),
                    ("csrf_token", &token),
                ],
            )
            .await;
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.body.contains("500 - Something went wrong"));

        store.broken.store(false, Ordering::SeqCst);
        let res = b.get("/").await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.body.contains("<td>Ann</td>"));
        assert!(!res.body.contains("<td>Bob</td>"));

        let res = b
            .submit("/", "/", "Bob", "bob@example.com", "longenoughpw")
            .await;
        assert_eq!(res.status, StatusCode::SEE_OTHER);
        assert_eq!(store.inner.list().await.unwrap().len(), 2);
    }

    #[test]
    fn ids_must_be_plain_integers() {
        assert_eq!(parse_id("7").unwrap(), 7);
        assert!(matches!(parse_id("").unwrap_err(), AppError::NotFound));
        assert!(matches!(parse_id("+7").unwrap_err(), AppError::NotFound));
        assert!(matches!(
            parse_id("99999999999999999999").unwrap_err(),
            AppError::NotFound
        ));
    }
}
