//! Thin gate that runs each payload's declarative constraints before
//! authority is consulted at all, so a malformed request never reaches the
//! authorizer's store lookup.

use std::sync::Arc;

use async_trait::async_trait;
use tollgate_core::{
    Key, KeyCreatePayload, KeyDeletePayload, KeyGetPayload, KeyList, KeyListPayload, Keyspace,
    KeyspaceCreatePayload, KeyspaceDeletePayload, KeyspaceGetPayload, KeyspaceList,
    KeyspaceListPayload, KeysCheckPayload, RequestContext, Result, ServiceKey,
    ServiceKeyCreatePayload, ServiceKeyDeletePayload, ServiceKeyGetPayload, ServiceKeyList,
    ServiceKeyListPayload, ServiceKeySetTokenPayload,
};

use crate::service::KeyService;

pub struct Validator<Inner: KeyService> {
    inner: Arc<Inner>,
}

impl<Inner: KeyService> Validator<Inner> {
    pub fn new(inner: Arc<Inner>) -> Self {
        Validator { inner }
    }
}

#[async_trait]
impl<Inner: KeyService> KeyService for Validator<Inner> {
    async fn key_check(&self, ctx: &RequestContext, payload: KeysCheckPayload, caller_token_hash: &str) -> Result<Key> {
        payload.validate_payload()?;
        self.inner.key_check(ctx, payload, caller_token_hash).await
    }

    async fn key_create(&self, ctx: &RequestContext, payload: KeyCreatePayload, caller_token_hash: &str) -> Result<Key> {
        payload.validate_payload()?;
        self.inner.key_create(ctx, payload, caller_token_hash).await
    }

    async fn key_get(&self, ctx: &RequestContext, payload: KeyGetPayload, caller_token_hash: &str) -> Result<Key> {
        payload.validate_payload()?;
        self.inner.key_get(ctx, payload, caller_token_hash).await
    }

    async fn key_list(&self, ctx: &RequestContext, mut payload: KeyListPayload, caller_token_hash: &str) -> Result<KeyList> {
        payload.list = payload.list.normalize();
        payload.validate_payload()?;
        self.inner.key_list(ctx, payload, caller_token_hash).await
    }

    async fn key_delete(&self, ctx: &RequestContext, payload: KeyDeletePayload, caller_token_hash: &str) -> Result<()> {
        payload.validate_payload()?;
        self.inner.key_delete(ctx, payload, caller_token_hash).await
    }

    async fn keyspace_create(
        &self,
        ctx: &RequestContext,
        payload: KeyspaceCreatePayload,
        caller_token_hash: &str,
    ) -> Result<Keyspace> {
        payload.validate_payload()?;
        self.inner.keyspace_create(ctx, payload, caller_token_hash).await
    }

    async fn keyspace_get(&self, ctx: &RequestContext, payload: KeyspaceGetPayload, caller_token_hash: &str) -> Result<Keyspace> {
        payload.validate_payload()?;
        self.inner.keyspace_get(ctx, payload, caller_token_hash).await
    }

    async fn keyspace_list(
        &self,
        ctx: &RequestContext,
        mut payload: KeyspaceListPayload,
        caller_token_hash: &str,
    ) -> Result<KeyspaceList> {
        payload.list = payload.list.normalize();
        payload.validate_payload()?;
        self.inner.keyspace_list(ctx, payload, caller_token_hash).await
    }

    async fn keyspace_delete(&self, ctx: &RequestContext, payload: KeyspaceDeletePayload, caller_token_hash: &str) -> Result<()> {
        payload.validate_payload()?;
        self.inner.keyspace_delete(ctx, payload, caller_token_hash).await
    }

    async fn service_key_current(&self, ctx: &RequestContext, caller_token_hash: &str) -> Result<ServiceKey> {
        self.inner.service_key_current(ctx, caller_token_hash).await
    }

    async fn service_key_create(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeyCreatePayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKey> {
        payload.validate_payload()?;
        self.inner.service_key_create(ctx, payload, caller_token_hash).await
    }

    async fn service_key_get(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeyGetPayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKey> {
        payload.validate_payload()?;
        self.inner.service_key_get(ctx, payload, caller_token_hash).await
    }

    async fn service_key_list(
        &self,
        ctx: &RequestContext,
        mut payload: ServiceKeyListPayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKeyList> {
        payload.list = payload.list.normalize();
        payload.validate_payload()?;
        self.inner.service_key_list(ctx, payload, caller_token_hash).await
    }

    async fn service_key_delete(&self, ctx: &RequestContext, payload: ServiceKeyDeletePayload, caller_token_hash: &str) -> Result<()> {
        payload.validate_payload()?;
        self.inner.service_key_delete(ctx, payload, caller_token_hash).await
    }

    async fn service_key_set_token(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeySetTokenPayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKey> {
        payload.validate_payload()?;
        self.inner.service_key_set_token(ctx, payload, caller_token_hash).await
    }
}
