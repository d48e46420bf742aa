//! Bearer-token extraction: the token is hashed exactly once, at the HTTP
//! edge, and threaded through the pipeline as `caller_token_hash` rather
//! than re-hashed by each layer that needs it.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use tollgate_core::generate;

use crate::error::{ApiError, ErrorBody};

pub struct CallerTokenHash(pub String);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for CallerTokenHash
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(unauthorized)?;

        let token = header.strip_prefix("Bearer ").ok_or_else(unauthorized)?;
        if token.is_empty() {
            return Err(unauthorized());
        }
        Ok(CallerTokenHash(generate::hash(token)))
    }
}

fn unauthorized() -> ApiError {
    ApiError::raw(StatusCode::UNAUTHORIZED, ErrorBody { error: "unauthorized".to_string(), invalid_fields: None })
}
