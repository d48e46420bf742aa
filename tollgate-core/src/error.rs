//! Error taxonomy for tollgate operations.

use thiserror::Error;

/// The full set of errors a tollgate service call can return.
///
/// Propagation is intentionally flat: Authoritative, Authorizer, and
/// Validator all return this same type unchanged, and the HTTP edge is the
/// only place that maps it to a status code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("{entity} not found")]
    NotFound { entity: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid expiration")]
    InvalidExpiration,

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("key expired")]
    KeyExpired,

    #[error("unauthorized")]
    Unauthorized,

    #[error("{entity} already exists")]
    AlreadyExists { entity: String },

    #[error("cannot delete itself")]
    CannotDeleteItself,

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Build a not-found error naming the entity class, mirroring
    /// `ErrItemNotFound(entity)` from the reference implementation.
    pub fn item_not_found(entity: impl Into<String>) -> Self {
        Error::NotFound { entity: entity.into() }
    }

    /// Build an already-exists error naming the entity class.
    pub fn item_already_exists(entity: impl Into<String>) -> Self {
        Error::AlreadyExists { entity: entity.into() }
    }

    pub fn invalid_payload(reason: impl Into<String>) -> Self {
        Error::InvalidPayload(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
