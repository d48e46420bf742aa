//! The service key entity: the principal credential used to call the
//! service itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::generate;
use crate::ids::ServiceKeyId;
use crate::list::{ListMetadata, ListPayload};
use crate::policy::Policies;
use crate::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceKey {
    pub skid: ServiceKeyId,
    pub description: String,
    pub admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Policies::is_empty")]
    pub keyspaces_policies: Policies,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceKeyList {
    #[serde(flatten)]
    pub metadata: ListMetadata,
    pub service_keys: Vec<ServiceKey>,
}

/// How a service key is looked up: by SKID, or by the raw bearer token
/// (hashed before the store sees it), mirroring `ServiceKeyGetPayload.By()`.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceKeyLookup {
    BySkid(ServiceKeyId),
    ByTokenHash(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceKeyGetPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skid: Option<ServiceKeyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl ServiceKeyGetPayload {
    pub fn validate_payload(&self) -> Result<(), Error> {
        if self.skid.is_none() && self.token.is_none() {
            return Err(Error::invalid_payload("either skid or token is required"));
        }
        Ok(())
    }

    pub fn lookup_by(&self) -> ServiceKeyLookup {
        if let Some(skid) = &self.skid {
            return ServiceKeyLookup::BySkid(skid.clone());
        }
        ServiceKeyLookup::ByTokenHash(generate::hash(self.token.as_deref().unwrap_or_default()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct ServiceKeyCreatePayload {
    #[validate(length(min = 1))]
    pub description: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub keyspaces_policies: Policies,
}

impl ServiceKeyCreatePayload {
    pub fn validate_payload(&self) -> Result<(), Error> {
        self.validate().map_err(|e| Error::invalid_payload(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct ServiceKeyListPayload {
    #[serde(flatten)]
    #[validate(nested)]
    pub list: ListPayload,
}

impl ServiceKeyListPayload {
    pub fn validate_payload(&self) -> Result<(), Error> {
        self.validate().map_err(|e| Error::invalid_payload(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceKeyDeletePayload {
    pub skid: Option<ServiceKeyId>,
}

impl ServiceKeyDeletePayload {
    pub fn validate_payload(&self) -> Result<(), Error> {
        if self.skid.is_none() {
            return Err(Error::invalid_payload("skid is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceKeySetTokenPayload {
    pub skid: Option<ServiceKeyId>,
}

impl ServiceKeySetTokenPayload {
    pub fn validate_payload(&self) -> Result<(), Error> {
        if self.skid.is_none() {
            return Err(Error::invalid_payload("skid is required"));
        }
        Ok(())
    }
}
