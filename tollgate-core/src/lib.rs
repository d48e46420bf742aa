//! Core data types, rate-limit math, and error taxonomy shared by every
//! tollgate crate: the entities (keyspace, key, service key), their request
//! payloads, pagination, policy evaluation, and identifier/token generation.
//!
//! This crate does no I/O and knows nothing of storage backends or HTTP; it
//! is the vocabulary the rest of the workspace is built from.

pub mod context;
pub mod error;
pub mod generate;
pub mod ids;
pub mod key;
pub mod keyspace;
pub mod list;
pub mod policy;
pub mod ratelimit;
pub mod service_key;

pub use context::RequestContext;
pub use error::{Error, Result};
pub use ids::{KeyId, KeyspaceId, ServiceKeyId};
pub use key::{
    Key, KeyCreatePayload, KeyDeletePayload, KeyGetPayload, KeyList, KeyListPayload, KeyLookup,
    KeysCheckPayload, RateLimit, RateLimitPayload,
};
pub use keyspace::{
    Keyspace, KeyspaceCreatePayload, KeyspaceDeletePayload, KeyspaceGetPayload, KeyspaceList,
    KeyspaceListPayload,
};
pub use list::{ListMetadata, ListPayload};
pub use policy::{Action, Policies, Policy, WILDCARD};
pub use ratelimit::{Millis, RateLimitConfig, RateLimitState, Refilled};
pub use service_key::{
    ServiceKey, ServiceKeyCreatePayload, ServiceKeyDeletePayload, ServiceKeyGetPayload,
    ServiceKeyList, ServiceKeyListPayload, ServiceKeyLookup, ServiceKeySetTokenPayload,
};
