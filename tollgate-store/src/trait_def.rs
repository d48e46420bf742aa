//! The storage abstraction every backend implements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tollgate_core::{
    Key, KeyId, KeyList, KeyListPayload, KeyLookup, Keyspace, KeyspaceId, KeyspaceList,
    KeyspaceListPayload, Policies, RateLimit, RequestContext, Result, ServiceKey, ServiceKeyList,
    ServiceKeyListPayload, ServiceKeyLookup,
};

/// Storage for tollgate's three entities plus the cross-cutting operations
/// (policy maps, rate-limit bookkeeping, bootstrap) that don't belong to any
/// single entity.
///
/// Every getter and lister silently excludes soft-deleted rows; a caller
/// can never observe a `deleted_at`-set row through this trait. Ordering is
/// fixed per entity: keys by `created_at` descending, keyspaces by `name`
/// ascending, service keys by `created_at` ascending.
#[async_trait]
pub trait Store: Send + Sync {
    // ========================================================================
    // KEYSPACE
    // ========================================================================

    async fn create_keyspace(&self, ctx: &RequestContext, keyspace: Keyspace) -> Result<Keyspace>;

    async fn get_keyspace(&self, ctx: &RequestContext, ksid: &KeyspaceId) -> Result<Keyspace>;

    async fn list_keyspaces(
        &self,
        ctx: &RequestContext,
        payload: &KeyspaceListPayload,
    ) -> Result<KeyspaceList>;

    /// Soft-deletes the keyspace and cascades the soft-delete to every key
    /// it owns, as one logical transaction.
    async fn delete_keyspace(
        &self,
        ctx: &RequestContext,
        ksid: &KeyspaceId,
        now: DateTime<Utc>,
    ) -> Result<()>;

    // ========================================================================
    // KEY
    // ========================================================================

    /// `token_hash` is persisted for lookup; `key.token` itself is never
    /// written to storage, only ever returned once at creation time.
    async fn create_key(
        &self,
        ctx: &RequestContext,
        key: Key,
        token_hash: String,
    ) -> Result<Key>;

    async fn get_key(
        &self,
        ctx: &RequestContext,
        ksid: &KeyspaceId,
        lookup: &KeyLookup,
    ) -> Result<Key>;

    async fn list_keys(&self, ctx: &RequestContext, payload: &KeyListPayload) -> Result<KeyList>;

    async fn delete_key(&self, ctx: &RequestContext, ksid: &KeyspaceId, kid: &KeyId, now: DateTime<Utc>) -> Result<()>;

    async fn update_key_last_used(
        &self,
        ctx: &RequestContext,
        kid: &KeyId,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Unconditionally decrement `remaining` by one in a single round-trip
    /// and return the post-decrement value. No refill and no threshold
    /// check happen here: the caller refills in memory and decides whether
    /// to call this at all (see `KeyCheck`'s `remaining > 0` pre-check).
    /// The returned value may be negative; a negative or zero result is how
    /// the caller learns the bucket was exhausted. Each concurrent caller
    /// against the same key observes a distinct result.
    async fn decrement_key_remaining(
        &self,
        ctx: &RequestContext,
        kid: &KeyId,
        now: DateTime<Utc>,
    ) -> Result<i64>;

    /// Persist `remaining` and `last_refilled` together, used when the
    /// caller has already computed a refill and wants it written back
    /// without also charging a decrement.
    async fn set_key_remaining(
        &self,
        ctx: &RequestContext,
        kid: &KeyId,
        remaining: i64,
        last_refilled: DateTime<Utc>,
    ) -> Result<()>;

    /// Copy a keyspace-inherited rate-limit config plus freshly computed
    /// state onto a key whose own `ratelimit` is currently unset, the first
    /// time inheritance is observed. A no-op if the key already has its own
    /// rate-limit block.
    async fn materialize_inherited_rate_limit(
        &self,
        ctx: &RequestContext,
        kid: &KeyId,
        rate_limit: RateLimit,
    ) -> Result<()>;

    // ========================================================================
    // SERVICE KEY
    // ========================================================================

    async fn create_service_key(
        &self,
        ctx: &RequestContext,
        service_key: ServiceKey,
        token_hash: String,
    ) -> Result<ServiceKey>;

    async fn get_service_key(
        &self,
        ctx: &RequestContext,
        lookup: &ServiceKeyLookup,
    ) -> Result<ServiceKey>;

    async fn list_service_keys(
        &self,
        ctx: &RequestContext,
        payload: &ServiceKeyListPayload,
    ) -> Result<ServiceKeyList>;

    /// Soft-deletes the service key and hard-deletes its policy map entries.
    async fn delete_service_key(&self, ctx: &RequestContext, skid: &tollgate_core::ServiceKeyId) -> Result<()>;

    async fn set_keyspace_policies(
        &self,
        ctx: &RequestContext,
        skid: &tollgate_core::ServiceKeyId,
        policies: Policies,
    ) -> Result<()>;

    /// Rehash and store a new token for an existing service key, retiring
    /// the previous token-hash mapping so it no longer resolves.
    async fn set_service_key_token(
        &self,
        ctx: &RequestContext,
        skid: &tollgate_core::ServiceKeyId,
        token_hash: String,
    ) -> Result<()>;

    async fn get_keyspace_policies(
        &self,
        ctx: &RequestContext,
        skid: &tollgate_core::ServiceKeyId,
    ) -> Result<Policies>;

    /// Install the fixed `sk_root` identity from a configured root token, if
    /// it does not already exist. Called once at startup; failure is fatal.
    async fn install_root_service_key(&self, ctx: &RequestContext, raw_token: &str) -> Result<()>;
}
