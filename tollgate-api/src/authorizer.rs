//! Policy-driven gate: wraps an inner service and checks the caller's
//! capabilities, via a service-key bearer token, before every delegated
//! call.

use std::sync::Arc;

use async_trait::async_trait;
use tollgate_core::{
    Action, Error, Key, KeyCreatePayload, KeyDeletePayload, KeyGetPayload, KeyList,
    KeyListPayload, Keyspace, KeyspaceCreatePayload, KeyspaceDeletePayload, KeyspaceGetPayload,
    KeyspaceList, KeyspaceListPayload, KeysCheckPayload, RequestContext, Result, ServiceKey,
    ServiceKeyCreatePayload, ServiceKeyDeletePayload, ServiceKeyGetPayload, ServiceKeyList,
    ServiceKeyListPayload, ServiceKeyLookup, ServiceKeySetTokenPayload, WILDCARD,
};
use tollgate_store::Store;

use crate::service::KeyService;

pub struct Authorizer<S: Store, Inner: KeyService> {
    store: Arc<S>,
    inner: Arc<Inner>,
}

impl<S: Store, Inner: KeyService> Authorizer<S, Inner> {
    pub fn new(store: Arc<S>, inner: Arc<Inner>) -> Self {
        Authorizer { store, inner }
    }

    /// Resolve the caller's identity from its bearer token hash. A missing
    /// service key reads as `Unauthorized`, never `NotFound`: the caller
    /// never learns whether its own token merely doesn't exist.
    async fn resolve_caller(&self, ctx: &RequestContext, caller_token_hash: &str) -> Result<ServiceKey> {
        match self
            .store
            .get_service_key(ctx, &ServiceKeyLookup::ByTokenHash(caller_token_hash.to_string()))
            .await
        {
            Ok(service_key) => Ok(service_key),
            Err(Error::NotFound { .. }) => Err(Error::Unauthorized),
            Err(other) => Err(other),
        }
    }

    fn require(caller: &ServiceKey, action: Action, ksid: &str) -> Result<()> {
        if caller.admin || caller.keyspaces_policies.can(action, ksid) {
            Ok(())
        } else {
            Err(Error::Unauthorized)
        }
    }

    fn require_admin(caller: &ServiceKey) -> Result<()> {
        if caller.admin {
            Ok(())
        } else {
            Err(Error::Unauthorized)
        }
    }
}

#[async_trait]
impl<S: Store, Inner: KeyService> KeyService for Authorizer<S, Inner> {
    async fn key_check(&self, ctx: &RequestContext, payload: KeysCheckPayload, caller_token_hash: &str) -> Result<Key> {
        let caller = self.resolve_caller(ctx, caller_token_hash).await?;
        let ksid = payload.ksid.as_ref().expect("validated above");
        Self::require(&caller, Action::Read, ksid.as_str())?;
        self.inner.key_check(ctx, payload, caller_token_hash).await
    }

    async fn key_create(&self, ctx: &RequestContext, payload: KeyCreatePayload, caller_token_hash: &str) -> Result<Key> {
        let caller = self.resolve_caller(ctx, caller_token_hash).await?;
        let ksid = payload.ksid.as_ref().expect("validated above");
        Self::require(&caller, Action::Write, ksid.as_str())?;
        self.inner.key_create(ctx, payload, caller_token_hash).await
    }

    async fn key_get(&self, ctx: &RequestContext, payload: KeyGetPayload, caller_token_hash: &str) -> Result<Key> {
        let caller = self.resolve_caller(ctx, caller_token_hash).await?;
        let ksid = payload.ksid.as_ref().expect("validated above");
        Self::require(&caller, Action::Read, ksid.as_str())?;
        self.inner.key_get(ctx, payload, caller_token_hash).await
    }

    async fn key_list(&self, ctx: &RequestContext, payload: KeyListPayload, caller_token_hash: &str) -> Result<KeyList> {
        let caller = self.resolve_caller(ctx, caller_token_hash).await?;
        let ksid = payload.ksid.as_ref().expect("validated above");
        Self::require(&caller, Action::Read, ksid.as_str())?;
        self.inner.key_list(ctx, payload, caller_token_hash).await
    }

    async fn key_delete(&self, ctx: &RequestContext, payload: KeyDeletePayload, caller_token_hash: &str) -> Result<()> {
        let caller = self.resolve_caller(ctx, caller_token_hash).await?;
        let ksid = payload.ksid.as_ref().expect("validated above");
        Self::require(&caller, Action::Write, ksid.as_str())?;
        self.inner.key_delete(ctx, payload, caller_token_hash).await
    }

    async fn keyspace_create(
        &self,
        ctx: &RequestContext,
        payload: KeyspaceCreatePayload,
        caller_token_hash: &str,
    ) -> Result<Keyspace> {
        let caller = self.resolve_caller(ctx, caller_token_hash).await?;
        Self::require_admin(&caller)?;
        self.inner.keyspace_create(ctx, payload, caller_token_hash).await
    }

    async fn keyspace_get(&self, ctx: &RequestContext, payload: KeyspaceGetPayload, caller_token_hash: &str) -> Result<Keyspace> {
        let caller = self.resolve_caller(ctx, caller_token_hash).await?;
        let ksid = payload.ksid.as_ref().expect("validated above");
        Self::require(&caller, Action::Read, ksid.as_str())?;
        self.inner.keyspace_get(ctx, payload, caller_token_hash).await
    }

    async fn keyspace_list(
        &self,
        ctx: &RequestContext,
        mut payload: KeyspaceListPayload,
        caller_token_hash: &str,
    ) -> Result<KeyspaceList> {
        let caller = self.resolve_caller(ctx, caller_token_hash).await?;
        if !caller.admin && !caller.keyspaces_policies.can(Action::Read, WILDCARD) {
            payload.filter_by_skid_policies = Some(caller.skid.as_str().to_string());
        }
        self.inner.keyspace_list(ctx, payload, caller_token_hash).await
    }

    async fn keyspace_delete(&self, ctx: &RequestContext, payload: KeyspaceDeletePayload, caller_token_hash: &str) -> Result<()> {
        let caller = self.resolve_caller(ctx, caller_token_hash).await?;
        Self::require_admin(&caller)?;
        self.inner.keyspace_delete(ctx, payload, caller_token_hash).await
    }

    async fn service_key_current(&self, ctx: &RequestContext, caller_token_hash: &str) -> Result<ServiceKey> {
        self.resolve_caller(ctx, caller_token_hash).await?;
        self.inner.service_key_current(ctx, caller_token_hash).await
    }

    async fn service_key_create(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeyCreatePayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKey> {
        let caller = self.resolve_caller(ctx, caller_token_hash).await?;
        Self::require_admin(&caller)?;
        self.inner.service_key_create(ctx, payload, caller_token_hash).await
    }

    async fn service_key_get(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeyGetPayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKey> {
        let caller = self.resolve_caller(ctx, caller_token_hash).await?;
        if caller.admin {
            return self.inner.service_key_get(ctx, payload, caller_token_hash).await;
        }
        // Non-admin: resolve the target directly and compare, flattening
        // only not-found to Unauthorized so a caller can't distinguish
        // "wrong SKID" from "that SKID doesn't exist" by probing. Any other
        // error (cancellation, internal failure) still propagates.
        let target = match self.store.get_service_key(ctx, &payload.lookup_by()).await {
            Ok(target) => target,
            Err(Error::NotFound { .. }) => return Err(Error::Unauthorized),
            Err(other) => return Err(other),
        };
        if target.skid != caller.skid {
            return Err(Error::Unauthorized);
        }
        self.inner.service_key_get(ctx, payload, caller_token_hash).await
    }

    async fn service_key_list(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeyListPayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKeyList> {
        let caller = self.resolve_caller(ctx, caller_token_hash).await?;
        Self::require_admin(&caller)?;
        self.inner.service_key_list(ctx, payload, caller_token_hash).await
    }

    async fn service_key_delete(&self, ctx: &RequestContext, payload: ServiceKeyDeletePayload, caller_token_hash: &str) -> Result<()> {
        let caller = self.resolve_caller(ctx, caller_token_hash).await?;
        let skid = payload.skid.as_ref().expect("validated above");
        if &caller.skid == skid {
            return Err(Error::CannotDeleteItself);
        }
        Self::require_admin(&caller)?;
        self.inner.service_key_delete(ctx, payload, caller_token_hash).await
    }

    async fn service_key_set_token(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeySetTokenPayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKey> {
        let caller = self.resolve_caller(ctx, caller_token_hash).await?;
        let skid = payload.skid.as_ref().expect("validated above");
        if !caller.admin && &caller.skid != skid {
            return Err(Error::Unauthorized);
        }
        self.inner.service_key_set_token(ctx, payload, caller_token_hash).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use tollgate_core::{generate, Policies, Policy, ServiceKeyId};
    use tollgate_store::MemoryStore;

    use super::*;
    use crate::authoritative::Authoritative;

    async fn harness() -> (Arc<MemoryStore>, Authorizer<MemoryStore, Authoritative<MemoryStore>>) {
        let store = Arc::new(MemoryStore::new());
        let inner = Arc::new(Authoritative::new(store.clone()));
        (store.clone(), Authorizer::new(store, inner))
    }

    async fn plant_service_key(store: &MemoryStore, admin: bool, policies: Policies) -> (ServiceKeyId, String) {
        let ctx = RequestContext::new();
        let raw_token = generate::token();
        let token_hash = generate::hash(&raw_token);
        let skid = ServiceKeyId::generate();
        let service_key = ServiceKey {
            skid: skid.clone(),
            description: "test".to_string(),
            admin,
            token: Some(raw_token),
            keyspaces_policies: policies,
            created_at: Utc::now(),
            deleted_at: None,
        };
        store.create_service_key(&ctx, service_key, token_hash.clone()).await.unwrap();
        (skid, token_hash)
    }

    #[tokio::test]
    async fn admin_bypasses_every_keyspace_create_check() {
        let (store, authorizer) = harness().await;
        let (_, admin_hash) = plant_service_key(&store, true, Policies::new()).await;
        let ctx = RequestContext::new();
        let payload = KeyspaceCreatePayload {
            name: "ks".to_string(),
            keys_prefix: "k_".to_string(),
            ratelimit: Default::default(),
        };
        let result = authorizer.keyspace_create(&ctx, payload, &admin_hash).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn non_admin_without_write_policy_is_denied_key_create() {
        let (store, authorizer) = harness().await;
        let ctx = RequestContext::new();
        let keyspace = store
            .create_keyspace(
                &ctx,
                Keyspace {
                    ksid: tollgate_core::KeyspaceId::generate(),
                    name: "ks".to_string(),
                    keys_prefix: "k_".to_string(),
                    ratelimit: None,
                    deleted_at: None,
                },
            )
            .await
            .unwrap();
        let (_, caller_hash) = plant_service_key(&store, false, Policies::new()).await;
        let payload = KeyCreatePayload {
            ksid: Some(keyspace.ksid),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            expires_in: None,
            ratelimit: Default::default(),
        };
        let result = authorizer.key_create(&ctx, payload, &caller_hash).await;
        assert_eq!(result.unwrap_err(), Error::Unauthorized);
    }

    #[tokio::test]
    async fn wildcard_write_policy_grants_key_create_on_any_keyspace() {
        let (store, authorizer) = harness().await;
        let ctx = RequestContext::new();
        let keyspace = store
            .create_keyspace(
                &ctx,
                Keyspace {
                    ksid: tollgate_core::KeyspaceId::generate(),
                    name: "ks".to_string(),
                    keys_prefix: "k_".to_string(),
                    ratelimit: None,
                    deleted_at: None,
                },
            )
            .await
            .unwrap();
        let mut policies = Policies::new();
        policies.insert(WILDCARD, Policy { read: true, write: true });
        let (_, caller_hash) = plant_service_key(&store, false, policies).await;
        let payload = KeyCreatePayload {
            ksid: Some(keyspace.ksid),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            expires_in: None,
            ratelimit: Default::default(),
        };
        let result = authorizer.key_create(&ctx, payload, &caller_hash).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn service_key_delete_refuses_self_delete_even_for_an_admin() {
        let (store, authorizer) = harness().await;
        let ctx = RequestContext::new();
        let (admin_skid, admin_hash) = plant_service_key(&store, true, Policies::new()).await;
        let payload = ServiceKeyDeletePayload { skid: Some(admin_skid) };
        let result = authorizer.service_key_delete(&ctx, payload, &admin_hash).await;
        assert_eq!(result.unwrap_err(), Error::CannotDeleteItself);
    }

    #[tokio::test]
    async fn non_admin_service_key_get_on_another_skid_collapses_to_unauthorized() {
        let (store, authorizer) = harness().await;
        let ctx = RequestContext::new();
        let (other_skid, _) = plant_service_key(&store, false, Policies::new()).await;
        let (_, caller_hash) = plant_service_key(&store, false, Policies::new()).await;
        let payload = ServiceKeyGetPayload { skid: Some(other_skid), token: None };
        let result = authorizer.service_key_get(&ctx, payload, &caller_hash).await;
        assert_eq!(result.unwrap_err(), Error::Unauthorized);
    }

    #[tokio::test]
    async fn non_admin_service_key_get_on_a_nonexistent_skid_also_reads_as_unauthorized() {
        let (store, authorizer) = harness().await;
        let ctx = RequestContext::new();
        let (_, caller_hash) = plant_service_key(&store, false, Policies::new()).await;
        let payload = ServiceKeyGetPayload { skid: Some(ServiceKeyId::generate()), token: None };
        let result = authorizer.service_key_get(&ctx, payload, &caller_hash).await;
        assert_eq!(result.unwrap_err(), Error::Unauthorized);
    }

    #[tokio::test]
    async fn unknown_bearer_token_is_unauthorized_not_not_found() {
        let (_, authorizer) = harness().await;
        let ctx = RequestContext::new();
        let result = authorizer.service_key_current(&ctx, "not-a-real-hash").await;
        assert_eq!(result.unwrap_err(), Error::Unauthorized);
    }
}
