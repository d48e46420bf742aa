//! The reference implementation of the service contract: composes `Store`
//! operations into the full `KeyService` surface. No policy enforcement, no
//! validation beyond what's needed to execute the operation — those are the
//! `Authorizer` and `Validator` layers' jobs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tollgate_core::ratelimit::{self, RateLimitState};
use tollgate_core::{
    generate, Error, Key, KeyCreatePayload, KeyDeletePayload, KeyGetPayload, KeyId, KeyList,
    KeyListPayload, Keyspace, KeyspaceCreatePayload, KeyspaceDeletePayload, KeyspaceGetPayload,
    KeyspaceList, KeyspaceListPayload, KeysCheckPayload, RateLimit, RequestContext, Result,
    ServiceKey, ServiceKeyCreatePayload, ServiceKeyDeletePayload, ServiceKeyGetPayload,
    ServiceKeyId, ServiceKeyList, ServiceKeyListPayload, ServiceKeyLookup,
    ServiceKeySetTokenPayload,
};
use tollgate_store::Store;

use crate::service::KeyService;

pub struct Authoritative<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Authoritative<S> {
    pub fn new(store: Arc<S>) -> Self {
        Authoritative { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[async_trait]
impl<S: Store> KeyService for Authoritative<S> {
    async fn key_check(&self, ctx: &RequestContext, payload: KeysCheckPayload, caller_token_hash: &str) -> Result<Key> {
        let mut key = self.key_get(ctx, payload, caller_token_hash).await?;
        let now = Utc::now();
        if key.is_expired(now) {
            return Err(Error::KeyExpired);
        }
        self.store.update_key_last_used(ctx, &key.kid, now).await?;
        key.last_used = Some(now);

        let Some(ratelimit) = key.ratelimit else {
            return Ok(key);
        };
        if !ratelimit.configured() {
            return Ok(key);
        }
        let remaining = ratelimit.state.map(|s| s.remaining).unwrap_or(ratelimit.limit);
        if remaining <= 0 {
            return Err(Error::RateLimitExceeded);
        }
        let new_remaining = self.store.decrement_key_remaining(ctx, &key.kid, now).await?;
        key.ratelimit = Some(RateLimit {
            state: Some(RateLimitState { remaining: new_remaining, last_refilled: now }),
            ..ratelimit
        });
        Ok(key)
    }

    async fn key_create(&self, ctx: &RequestContext, payload: KeyCreatePayload, _caller_token_hash: &str) -> Result<Key> {
        payload.validate_payload()?;
        let ksid = payload.ksid.clone().expect("validated above");
        let keyspace = self.store.get_keyspace(ctx, &ksid).await?;
        let now = Utc::now();
        let expires_at = payload.resolve_expiration(now).ok_or(Error::InvalidExpiration)?;

        let raw_token = format!("{}{}", keyspace.keys_prefix, generate::token());
        let token_hash = generate::hash(&raw_token);

        let ratelimit = if payload.ratelimit.configured() {
            Some(RateLimit {
                limit: payload.ratelimit.limit,
                refill_rate: payload.ratelimit.refill_rate,
                refill_interval: payload.ratelimit.refill_interval,
                state: Some(RateLimitState { remaining: payload.ratelimit.limit, last_refilled: now }),
            })
        } else {
            None
        };

        let key = Key {
            kid: KeyId::generate(),
            ksid,
            token: Some(raw_token),
            last_used: None,
            expires_at,
            created_at: now,
            deleted_at: None,
            ratelimit,
        };
        self.store.create_key(ctx, key, token_hash).await
    }

    async fn key_get(&self, ctx: &RequestContext, payload: KeyGetPayload, _caller_token_hash: &str) -> Result<Key> {
        payload.validate_payload()?;
        let ksid = payload.ksid.clone().expect("validated above");
        let lookup = payload.lookup_by()?;
        let mut key = self.store.get_key(ctx, &ksid, &lookup).await?;
        let now = Utc::now();

        let own_rate_limit_configured = key.configured_rate_limit();
        if !own_rate_limit_configured {
            let keyspace = self.store.get_keyspace(ctx, &ksid).await?;
            if keyspace.configured_rate_limit() {
                key.ratelimit = keyspace.ratelimit;
            }
        }

        if let Some(ratelimit) = key.ratelimit {
            if ratelimit.configured() {
                let state = ratelimit.state.unwrap_or(RateLimitState { remaining: ratelimit.limit, last_refilled: now });
                let refilled = ratelimit::refill(&ratelimit.config(), &state, now);
                key.ratelimit = Some(RateLimit { state: Some(refilled.state), ..ratelimit });
                if refilled.updated {
                    if own_rate_limit_configured {
                        self.store.set_key_remaining(ctx, &key.kid, refilled.state.remaining, refilled.state.last_refilled).await?;
                    } else {
                        self.store.materialize_inherited_rate_limit(ctx, &key.kid, key.ratelimit.unwrap()).await?;
                    }
                }
            }
        }

        Ok(key)
    }

    async fn key_list(&self, ctx: &RequestContext, payload: KeyListPayload, _caller_token_hash: &str) -> Result<KeyList> {
        payload.validate_payload()?;
        self.store.list_keys(ctx, &payload).await
    }

    async fn key_delete(&self, ctx: &RequestContext, payload: KeyDeletePayload, _caller_token_hash: &str) -> Result<()> {
        payload.validate_payload()?;
        let ksid = payload.ksid.clone().expect("validated above");
        let kid = payload.kid.clone().expect("validated above");
        self.store.delete_key(ctx, &ksid, &kid, Utc::now()).await
    }

    async fn keyspace_create(
        &self,
        ctx: &RequestContext,
        payload: KeyspaceCreatePayload,
        _caller_token_hash: &str,
    ) -> Result<Keyspace> {
        payload.validate_payload()?;
        let ratelimit = if payload.ratelimit.configured() {
            Some(RateLimit {
                limit: payload.ratelimit.limit,
                refill_rate: payload.ratelimit.refill_rate,
                refill_interval: payload.ratelimit.refill_interval,
                state: None,
            })
        } else {
            None
        };
        let keyspace = Keyspace {
            ksid: tollgate_core::KeyspaceId::generate(),
            name: payload.name,
            keys_prefix: payload.keys_prefix,
            ratelimit,
            deleted_at: None,
        };
        self.store.create_keyspace(ctx, keyspace).await
    }

    async fn keyspace_get(&self, ctx: &RequestContext, payload: KeyspaceGetPayload, _caller_token_hash: &str) -> Result<Keyspace> {
        payload.validate_payload()?;
        self.store.get_keyspace(ctx, &payload.ksid.expect("validated above")).await
    }

    async fn keyspace_list(
        &self,
        ctx: &RequestContext,
        payload: KeyspaceListPayload,
        _caller_token_hash: &str,
    ) -> Result<KeyspaceList> {
        payload.validate_payload()?;
        self.store.list_keyspaces(ctx, &payload).await
    }

    async fn keyspace_delete(&self, ctx: &RequestContext, payload: KeyspaceDeletePayload, _caller_token_hash: &str) -> Result<()> {
        payload.validate_payload()?;
        self.store.delete_keyspace(ctx, &payload.ksid.expect("validated above"), Utc::now()).await
    }

    async fn service_key_current(&self, ctx: &RequestContext, caller_token_hash: &str) -> Result<ServiceKey> {
        self.store.get_service_key(ctx, &ServiceKeyLookup::ByTokenHash(caller_token_hash.to_string())).await
    }

    async fn service_key_create(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeyCreatePayload,
        _caller_token_hash: &str,
    ) -> Result<ServiceKey> {
        payload.validate_payload()?;
        let raw_token = generate::token();
        let token_hash = generate::hash(&raw_token);
        let service_key = ServiceKey {
            skid: ServiceKeyId::generate(),
            description: payload.description,
            admin: payload.admin,
            token: Some(raw_token),
            keyspaces_policies: payload.keyspaces_policies,
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.store.create_service_key(ctx, service_key, token_hash).await
    }

    async fn service_key_get(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeyGetPayload,
        _caller_token_hash: &str,
    ) -> Result<ServiceKey> {
        payload.validate_payload()?;
        self.store.get_service_key(ctx, &payload.lookup_by()).await
    }

    async fn service_key_list(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeyListPayload,
        _caller_token_hash: &str,
    ) -> Result<ServiceKeyList> {
        payload.validate_payload()?;
        self.store.list_service_keys(ctx, &payload).await
    }

    async fn service_key_delete(&self, ctx: &RequestContext, payload: ServiceKeyDeletePayload, _caller_token_hash: &str) -> Result<()> {
        payload.validate_payload()?;
        self.store.delete_service_key(ctx, &payload.skid.expect("validated above")).await
    }

    async fn service_key_set_token(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeySetTokenPayload,
        _caller_token_hash: &str,
    ) -> Result<ServiceKey> {
        payload.validate_payload()?;
        let skid = payload.skid.expect("validated above");
        let raw_token = generate::token();
        let token_hash = generate::hash(&raw_token);
        self.store.set_service_key_token(ctx, &skid, token_hash).await?;
        let mut service_key = self.store.get_service_key(ctx, &ServiceKeyLookup::BySkid(skid)).await?;
        service_key.token = Some(raw_token);
        Ok(service_key)
    }
}

#[cfg(test)]
mod tests {
    use tollgate_core::{KeyLookup, RateLimitPayload};
    use tollgate_store::MemoryStore;

    use super::*;

    fn harness() -> Authoritative<MemoryStore> {
        Authoritative::new(Arc::new(MemoryStore::new()))
    }

    async fn create_keyspace(svc: &Authoritative<MemoryStore>, ratelimit: RateLimitPayload) -> Keyspace {
        let ctx = RequestContext::new();
        svc.keyspace_create(
            &ctx,
            KeyspaceCreatePayload { name: "ks".to_string(), keys_prefix: "k_".to_string(), ratelimit },
            "",
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn key_create_then_check_succeeds_with_no_rate_limit() {
        let svc = harness();
        let ctx = RequestContext::new();
        let keyspace = create_keyspace(&svc, RateLimitPayload::default()).await;
        let key = svc
            .key_create(
                &ctx,
                KeyCreatePayload { ksid: Some(keyspace.ksid.clone()), expires_at: None, expires_in: None, ratelimit: RateLimitPayload::default() },
                "",
            )
            .await
            .unwrap();
        let raw_token = key.token.clone().unwrap();
        let checked = svc
            .key_check(&ctx, KeysCheckPayload { ksid: Some(keyspace.ksid), kid: None, token: Some(raw_token) }, "")
            .await
            .unwrap();
        assert!(checked.last_used.is_some());
    }

    #[tokio::test]
    async fn key_check_rejects_an_expired_key() {
        let svc = harness();
        let ctx = RequestContext::new();
        let keyspace = create_keyspace(&svc, RateLimitPayload::default()).await;
        let key = svc
            .key_create(
                &ctx,
                KeyCreatePayload {
                    ksid: Some(keyspace.ksid.clone()),
                    expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
                    expires_in: None,
                    ratelimit: RateLimitPayload::default(),
                },
                "",
            )
            .await
            .unwrap();
        let raw_token = key.token.clone().unwrap();
        let result = svc
            .key_check(&ctx, KeysCheckPayload { ksid: Some(keyspace.ksid), kid: None, token: Some(raw_token) }, "")
            .await;
        assert_eq!(result.unwrap_err(), Error::KeyExpired);
    }

    #[tokio::test]
    async fn key_check_exhausts_its_bucket_then_rejects() {
        let svc = harness();
        let ctx = RequestContext::new();
        let keyspace = create_keyspace(&svc, RateLimitPayload::default()).await;
        let key = svc
            .key_create(
                &ctx,
                KeyCreatePayload {
                    ksid: Some(keyspace.ksid.clone()),
                    expires_at: None,
                    expires_in: None,
                    ratelimit: RateLimitPayload { limit: 1, refill_rate: 1, refill_interval: tollgate_core::Millis(3_600_000) },
                },
                "",
            )
            .await
            .unwrap();
        let raw_token = key.token.clone().unwrap();
        let payload = || KeysCheckPayload { ksid: Some(keyspace.ksid.clone()), kid: None, token: Some(raw_token.clone()) };
        svc.key_check(&ctx, payload(), "").await.unwrap();
        let result = svc.key_check(&ctx, payload(), "").await;
        assert_eq!(result.unwrap_err(), Error::RateLimitExceeded);
    }

    #[tokio::test]
    async fn key_get_materializes_the_keyspaces_rate_limit_onto_a_key_with_none_of_its_own() {
        let svc = harness();
        let ctx = RequestContext::new();
        let keyspace = create_keyspace(
            &svc,
            RateLimitPayload { limit: 5, refill_rate: 5, refill_interval: tollgate_core::Millis(1_000) },
        )
        .await;
        let key = svc
            .key_create(
                &ctx,
                KeyCreatePayload { ksid: Some(keyspace.ksid.clone()), expires_at: None, expires_in: None, ratelimit: RateLimitPayload::default() },
                "",
            )
            .await
            .unwrap();
        let fetched = svc
            .key_get(&ctx, KeyGetPayload { ksid: Some(keyspace.ksid.clone()), kid: Some(key.kid.clone()), token: None }, "")
            .await
            .unwrap();
        let ratelimit = fetched.ratelimit.expect("inherited rate limit should be materialized");
        assert_eq!(ratelimit.limit, 5);

        // Refetching must now read the key's own materialized row, not the
        // keyspace's, so a later keyspace-level change cannot retroactively
        // move an already-materialized key.
        let refetched = svc
            .key_get(&ctx, KeyGetPayload { ksid: Some(keyspace.ksid), kid: Some(key.kid), token: None }, "")
            .await
            .unwrap();
        assert_eq!(refetched.ratelimit.unwrap().limit, 5);
    }

    #[tokio::test]
    async fn key_get_by_token_resolves_the_same_key_as_by_id() {
        let svc = harness();
        let ctx = RequestContext::new();
        let keyspace = create_keyspace(&svc, RateLimitPayload::default()).await;
        let key = svc
            .key_create(
                &ctx,
                KeyCreatePayload { ksid: Some(keyspace.ksid.clone()), expires_at: None, expires_in: None, ratelimit: RateLimitPayload::default() },
                "",
            )
            .await
            .unwrap();
        let raw_token = key.token.clone().unwrap();
        let by_id = svc
            .key_get(&ctx, KeyGetPayload { ksid: Some(keyspace.ksid.clone()), kid: Some(key.kid.clone()), token: None }, "")
            .await
            .unwrap();
        let by_token = svc
            .key_get(&ctx, KeyGetPayload { ksid: Some(keyspace.ksid), kid: None, token: Some(raw_token) }, "")
            .await
            .unwrap();
        assert_eq!(by_id.kid, by_token.kid);
        let _: KeyLookup = KeyGetPayload { ksid: None, kid: Some(by_id.kid), token: None }.lookup_by().unwrap();
    }

    #[tokio::test]
    async fn keyspace_delete_then_get_reports_not_found() {
        let svc = harness();
        let ctx = RequestContext::new();
        let keyspace = create_keyspace(&svc, RateLimitPayload::default()).await;
        svc.keyspace_delete(&ctx, KeyspaceDeletePayload { ksid: Some(keyspace.ksid.clone()) }, "").await.unwrap();
        let result = svc.keyspace_get(&ctx, KeyspaceGetPayload { ksid: Some(keyspace.ksid) }, "").await;
        assert!(matches!(result.unwrap_err(), Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn service_key_set_token_retires_the_old_token_hash() {
        let svc = harness();
        let ctx = RequestContext::new();
        let service_key = svc
            .service_key_create(
                &ctx,
                ServiceKeyCreatePayload { description: "svc".to_string(), admin: false, keyspaces_policies: Default::default() },
                "",
            )
            .await
            .unwrap();
        let old_raw_token = service_key.token.clone().unwrap();
        let old_hash = generate::hash(&old_raw_token);

        let rotated = svc
            .service_key_set_token(&ctx, ServiceKeySetTokenPayload { skid: Some(service_key.skid.clone()) }, "")
            .await
            .unwrap();
        let new_raw_token = rotated.token.clone().unwrap();
        assert_ne!(new_raw_token, old_raw_token);

        let old_lookup = svc.service_key_get(&ctx, ServiceKeyGetPayload { skid: None, token: Some(old_raw_token) }, "").await;
        assert!(matches!(old_lookup.unwrap_err(), Error::NotFound { .. }));

        let by_old_hash = self_check_old_hash_gone(&svc, &old_hash).await;
        assert!(by_old_hash);

        let new_lookup = svc.service_key_get(&ctx, ServiceKeyGetPayload { skid: None, token: Some(new_raw_token) }, "").await;
        assert!(new_lookup.is_ok());
    }

    async fn self_check_old_hash_gone(svc: &Authoritative<MemoryStore>, old_hash: &str) -> bool {
        let ctx = RequestContext::new();
        matches!(
            svc.store.get_service_key(&ctx, &ServiceKeyLookup::ByTokenHash(old_hash.to_string())).await,
            Err(Error::NotFound { .. })
        )
    }

    #[tokio::test]
    async fn service_key_delete_then_current_lookup_by_its_old_token_fails() {
        let svc = harness();
        let ctx = RequestContext::new();
        let service_key = svc
            .service_key_create(
                &ctx,
                ServiceKeyCreatePayload { description: "svc".to_string(), admin: false, keyspaces_policies: Default::default() },
                "",
            )
            .await
            .unwrap();
        let raw_token = service_key.token.clone().unwrap();
        svc.service_key_delete(&ctx, ServiceKeyDeletePayload { skid: Some(service_key.skid) }, "").await.unwrap();
        let token_hash = generate::hash(&raw_token);
        let result = svc.service_key_current(&ctx, &token_hash).await;
        assert!(matches!(result.unwrap_err(), Error::NotFound { .. }));
    }
}
