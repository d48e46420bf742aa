//! The single switch that maps the domain error taxonomy to HTTP status
//! codes and the JSON error envelope. Every other layer propagates
//! `tollgate_core::Error` unchanged; only the edge looks at it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tollgate_core::Error;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_fields: Option<Vec<String>>,
}

/// Either a mapped domain error, or a status/body pair produced directly at
/// the edge (malformed JSON, a missing bearer token) that never passed
/// through the service pipeline.
#[derive(Debug)]
pub enum ApiError {
    Domain(Error),
    Raw(StatusCode, ErrorBody),
}

impl ApiError {
    pub fn raw(status: StatusCode, body: ErrorBody) -> Self {
        ApiError::Raw(status, body)
    }

    pub fn invalid_payload(fields: Vec<String>) -> Self {
        ApiError::Raw(
            StatusCode::BAD_REQUEST,
            ErrorBody { error: "invalid payload".to_string(), invalid_fields: Some(fields) },
        )
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Domain(err)
    }
}

fn status_code(err: &Error) -> StatusCode {
    match err {
        Error::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        Error::Unauthorized => StatusCode::UNAUTHORIZED,
        Error::CannotDeleteItself => StatusCode::FORBIDDEN,
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::AlreadyExists { .. } => StatusCode::CONFLICT,
        Error::KeyExpired => StatusCode::from_u16(419).unwrap(),
        Error::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        Error::InvalidExpiration => StatusCode::from_u16(460).unwrap(),
        Error::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Domain(err) => {
                let status = status_code(&err);
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(error = %err, "internal error");
                    let body = ErrorBody { error: "internal error".to_string(), invalid_fields: None };
                    return (status, Json(body)).into_response();
                }
                let body = ErrorBody { error: err.to_string(), invalid_fields: None };
                (status, Json(body)).into_response()
            }
            ApiError::Raw(status, body) => (status, Json(body)).into_response(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
