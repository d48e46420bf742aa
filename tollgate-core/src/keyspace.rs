//! The keyspace entity: a namespace owning keys, with its own default
//! rate-limit and token prefix.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::ids::KeyspaceId;
use crate::key::RateLimit;
use crate::key::RateLimitPayload;
use crate::list::{ListMetadata, ListPayload};
use crate::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyspace {
    pub ksid: KeyspaceId,
    pub name: String,
    pub keys_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratelimit: Option<RateLimit>,
    #[serde(skip)]
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Keyspace {
    pub fn configured_rate_limit(&self) -> bool {
        self.ratelimit.as_ref().is_some_and(|r| r.configured())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyspaceList {
    #[serde(flatten)]
    pub metadata: ListMetadata,
    pub keyspaces: Vec<Keyspace>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct KeyspaceCreatePayload {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1, max = 16))]
    pub keys_prefix: String,
    #[serde(default)]
    #[validate(nested)]
    pub ratelimit: RateLimitPayload,
}

impl KeyspaceCreatePayload {
    pub fn validate_payload(&self) -> Result<(), Error> {
        self.validate().map_err(|e| Error::invalid_payload(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyspaceGetPayload {
    pub ksid: Option<KeyspaceId>,
}

impl KeyspaceGetPayload {
    pub fn validate_payload(&self) -> Result<(), Error> {
        if self.ksid.is_none() {
            return Err(Error::invalid_payload("ksid is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct KeyspaceListPayload {
    #[serde(flatten)]
    #[validate(nested)]
    pub list: ListPayload,
    /// Set by the authorizer, never by the caller: restricts the listing
    /// to keyspaces the given service key has a policy entry for, used
    /// when a non-admin, non-wildcard-read caller lists keyspaces.
    #[serde(skip)]
    pub filter_by_skid_policies: Option<String>,
}

impl KeyspaceListPayload {
    pub fn validate_payload(&self) -> Result<(), Error> {
        self.validate().map_err(|e| Error::invalid_payload(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyspaceDeletePayload {
    pub ksid: Option<KeyspaceId>,
}

impl KeyspaceDeletePayload {
    pub fn validate_payload(&self) -> Result<(), Error> {
        if self.ksid.is_none() {
            return Err(Error::invalid_payload("ksid is required"));
        }
        Ok(())
    }
}
