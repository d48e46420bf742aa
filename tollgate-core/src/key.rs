//! The end-user credential entity and its request payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::ids::{KeyId, KeyspaceId};
use crate::list::{ListMetadata, ListPayload};
use crate::ratelimit::{Millis, RateLimitConfig, RateLimitState};
use crate::Error;

/// A rate-limit block attached to a [`Key`] or a `Keyspace`: configuration
/// plus, for a key, the live accounting state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    pub limit: i64,
    pub refill_rate: i64,
    pub refill_interval: Millis,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state: Option<RateLimitState>,
}

impl RateLimit {
    pub fn configured(&self) -> bool {
        self.config().configured()
    }

    pub fn config(&self) -> RateLimitConfig {
        RateLimitConfig {
            limit: self.limit,
            refill_rate: self.refill_rate,
            refill_interval: self.refill_interval,
        }
    }
}

/// The create-time request shape for a rate-limit: no state yet, since the
/// store initializes `remaining = limit` itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct RateLimitPayload {
    #[validate(range(min = 0))]
    pub limit: i64,
    #[validate(range(min = 0))]
    pub refill_rate: i64,
    pub refill_interval: Millis,
}

impl RateLimitPayload {
    pub fn configured(&self) -> bool {
        RateLimitConfig {
            limit: self.limit,
            refill_rate: self.refill_rate,
            refill_interval: self.refill_interval,
        }
        .configured()
    }
}

/// An end-user credential inside a keyspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Key {
    pub kid: KeyId,
    pub ksid: KeyspaceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub last_used: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratelimit: Option<RateLimit>,
}

impl Key {
    /// A key is expired iff `expires_at` is strictly in the past relative
    /// to `now`; a key whose `expires_at` equals `now` is not yet expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn configured_rate_limit(&self) -> bool {
        self.ratelimit.as_ref().is_some_and(|r| r.configured())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyList {
    #[serde(flatten)]
    pub metadata: ListMetadata,
    pub keys: Vec<Key>,
}

/// How either expiration is selected: a caller may supply an absolute
/// instant or a relative duration; if both are present, `expires_at` wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyCreatePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ksid: Option<KeyspaceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<Millis>,
    #[serde(default)]
    pub ratelimit: RateLimitPayload,
}

impl KeyCreatePayload {
    pub fn validate_payload(&self) -> Result<(), Error> {
        if self.ksid.is_none() {
            return Err(Error::invalid_payload("ksid is required"));
        }
        self.ratelimit
            .validate()
            .map_err(|e| Error::invalid_payload(e.to_string()))?;
        if self.expires_at.is_none() && self.expires_in.is_none() {
            return Err(Error::InvalidExpiration);
        }
        Ok(())
    }

    /// `expires_at` wins when both are present.
    pub fn resolve_expiration(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_at
            .or_else(|| self.expires_in.map(|d| now + d.as_chrono()))
    }
}

/// How a single key is looked up: by its own id, or by the raw token
/// presented by the caller (hashed before the store ever sees it).
#[derive(Debug, Clone, PartialEq)]
pub enum KeyLookup {
    ById(KeyId),
    ByToken(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyGetPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ksid: Option<KeyspaceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<KeyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl KeyGetPayload {
    pub fn validate_payload(&self) -> Result<(), Error> {
        if self.ksid.is_none() {
            return Err(Error::invalid_payload("ksid is required"));
        }
        if self.kid.is_none() && self.token.is_none() {
            return Err(Error::invalid_payload("either kid or token is required"));
        }
        Ok(())
    }

    pub fn lookup_by(&self) -> Result<KeyLookup, Error> {
        if let Some(kid) = &self.kid {
            return Ok(KeyLookup::ById(kid.clone()));
        }
        if let Some(token) = &self.token {
            return Ok(KeyLookup::ByToken(token.clone()));
        }
        Err(Error::invalid_payload("either kid or token is required"))
    }
}

/// `KeyCheck` shares `KeyGetPayload`'s lookup shape; the reference
/// implementation reuses the same struct under a second name for exactly
/// this reason.
pub type KeysCheckPayload = KeyGetPayload;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct KeyListPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ksid: Option<KeyspaceId>,
    #[serde(flatten)]
    #[validate(nested)]
    pub list: ListPayload,
}

impl KeyListPayload {
    pub fn validate_payload(&self) -> Result<(), Error> {
        if self.ksid.is_none() {
            return Err(Error::invalid_payload("ksid is required"));
        }
        self.validate().map_err(|e| Error::invalid_payload(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyDeletePayload {
    pub ksid: Option<KeyspaceId>,
    pub kid: Option<KeyId>,
}

impl KeyDeletePayload {
    pub fn validate_payload(&self) -> Result<(), Error> {
        if self.ksid.is_none() || self.kid.is_none() {
            return Err(Error::invalid_payload("ksid and kid are required"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_iff_expires_at_in_the_past() {
        let now = Utc::now();
        let key = Key {
            kid: KeyId::generate(),
            ksid: KeyspaceId::generate(),
            token: None,
            last_used: None,
            expires_at: now - chrono::Duration::seconds(1),
            created_at: now,
            deleted_at: None,
            ratelimit: None,
        };
        assert!(key.is_expired(now));
    }

    #[test]
    fn not_expired_when_expires_at_equals_now() {
        let now = Utc::now();
        let key = Key {
            kid: KeyId::generate(),
            ksid: KeyspaceId::generate(),
            token: None,
            last_used: None,
            expires_at: now,
            created_at: now,
            deleted_at: None,
            ratelimit: None,
        };
        assert!(!key.is_expired(now));
    }

    #[test]
    fn create_payload_requires_one_expiration_field() {
        let payload = KeyCreatePayload {
            ksid: Some(KeyspaceId::generate()),
            ..Default::default()
        };
        assert_eq!(payload.validate_payload(), Err(Error::InvalidExpiration));
    }

    #[test]
    fn expires_at_wins_over_expires_in_when_both_present() {
        let now = Utc::now();
        let explicit = now + chrono::Duration::hours(2);
        let payload = KeyCreatePayload {
            ksid: Some(KeyspaceId::generate()),
            expires_at: Some(explicit),
            expires_in: Some(Millis(3_600_000)),
            ratelimit: RateLimitPayload::default(),
        };
        assert_eq!(payload.resolve_expiration(now), Some(explicit));
    }
}
