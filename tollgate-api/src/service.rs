//! The capability every decorator in the pipeline implements and wraps:
//! `Validator -> Authorizer -> Authoritative -> Store`, with the optional
//! `ProxyCache` standing in front.
//!
//! The caller's bearer token is hashed exactly once at the HTTP edge and
//! threaded through as an explicit `caller_token_hash` argument rather than
//! smuggled inside each payload, per the design note on per-call arguments
//! over sideband payload fields.

use async_trait::async_trait;
use tollgate_core::{
    Key, KeyCreatePayload, KeyDeletePayload, KeyGetPayload, KeyList, KeyListPayload, Keyspace,
    KeyspaceCreatePayload, KeyspaceDeletePayload, KeyspaceGetPayload, KeyspaceList,
    KeyspaceListPayload, KeysCheckPayload, RequestContext, Result, ServiceKey,
    ServiceKeyCreatePayload, ServiceKeyDeletePayload, ServiceKeyGetPayload, ServiceKeyList,
    ServiceKeyListPayload, ServiceKeySetTokenPayload,
};

#[async_trait]
pub trait KeyService: Send + Sync {
    async fn key_check(&self, ctx: &RequestContext, payload: KeysCheckPayload, caller_token_hash: &str) -> Result<Key>;
    async fn key_create(&self, ctx: &RequestContext, payload: KeyCreatePayload, caller_token_hash: &str) -> Result<Key>;
    async fn key_get(&self, ctx: &RequestContext, payload: KeyGetPayload, caller_token_hash: &str) -> Result<Key>;
    async fn key_list(&self, ctx: &RequestContext, payload: KeyListPayload, caller_token_hash: &str) -> Result<KeyList>;
    async fn key_delete(&self, ctx: &RequestContext, payload: KeyDeletePayload, caller_token_hash: &str) -> Result<()>;

    async fn keyspace_create(
        &self,
        ctx: &RequestContext,
        payload: KeyspaceCreatePayload,
        caller_token_hash: &str,
    ) -> Result<Keyspace>;
    async fn keyspace_get(&self, ctx: &RequestContext, payload: KeyspaceGetPayload, caller_token_hash: &str) -> Result<Keyspace>;
    async fn keyspace_list(
        &self,
        ctx: &RequestContext,
        payload: KeyspaceListPayload,
        caller_token_hash: &str,
    ) -> Result<KeyspaceList>;
    async fn keyspace_delete(&self, ctx: &RequestContext, payload: KeyspaceDeletePayload, caller_token_hash: &str) -> Result<()>;

    /// `serviceKeys.current`: return the caller's own service key.
    async fn service_key_current(&self, ctx: &RequestContext, caller_token_hash: &str) -> Result<ServiceKey>;
    async fn service_key_create(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeyCreatePayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKey>;
    async fn service_key_get(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeyGetPayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKey>;
    async fn service_key_list(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeyListPayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKeyList>;
    async fn service_key_delete(&self, ctx: &RequestContext, payload: ServiceKeyDeletePayload, caller_token_hash: &str) -> Result<()>;
    async fn service_key_set_token(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeySetTokenPayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKey>;
}
