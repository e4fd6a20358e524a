use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::users::repo_types::StoreError;

const NOT_FOUND_PAGE: &str = include_str!("../templates/404.html");
const SERVER_ERROR_PAGE: &str = include_str!("../templates/500.html");

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Store(StoreError),
    #[error("template render failed: {0}")]
    Render(#[from] handlebars::RenderError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => AppError::NotFound,
            other => AppError::Store(other),
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Store(_) | Self::Render(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

pub fn not_found_page() -> Response {
    (StatusCode::NOT_FOUND, Html(NOT_FOUND_PAGE)).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.status_code() {
            StatusCode::NOT_FOUND => not_found_page(),
            status => {
                error!(error = %self, "request failed");
                (status, Html(SERVER_ERROR_PAGE)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_becomes_404() {
        let err = AppError::from(StoreError::NotFound(3));
        assert!(matches!(err, AppError::NotFound));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn other_failures_become_500_without_details() {
        let err = AppError::from(StoreError::DuplicateEmail);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let err = AppError::Internal(anyhow::anyhow!("db password is hunter2"));
        let res = err.into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(body, SERVER_ERROR_PAGE);
        assert!(!body.contains("hunter2"));
    }

    #[test]
    fn error_pages_are_html() {
        assert!(NOT_FOUND_PAGE.contains("<html"));
        assert!(SERVER_ERROR_PAGE.contains("<html"));
    }
}
