use std::convert::Infallible;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::COOKIE, request::Parts},
};

use super::csrf::COOKIE_NAME;

/// Value of the anti-forgery cookie, if the browser sent one.
pub struct CsrfCookie(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for CsrfCookie
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .flat_map(|h| h.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == COOKIE_NAME)
            .map(|(_, value)| value.to_string());
        Ok(CsrfCookie(value))
    }
}
