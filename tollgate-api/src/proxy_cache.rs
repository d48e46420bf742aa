//! Front-end cache for the `KeyCheck` hot path: answers from local state,
//! speculatively decrements, and reconciles against `inner` asynchronously.
//! Every other operation passes straight through to `inner`.
//!
//! Generic over its inner service so the same cache implementation backs
//! both `proxy` mode (`inner` is an [`UpstreamClient`] talking HTTP to a
//! remote authoritative node) and `async_authoritative` mode (`inner` is a
//! local, in-process `Authorizer`/`Authoritative` pair).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use moka::future::Cache;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tollgate_core::ratelimit::{self, RateLimitState};
use tollgate_core::{
    Action, Error, Key, KeyCreatePayload, KeyDeletePayload, KeyGetPayload, KeyList,
    KeyListPayload, Keyspace, KeyspaceCreatePayload, KeyspaceDeletePayload, KeyspaceGetPayload,
    KeyspaceList, KeyspaceListPayload, KeysCheckPayload, RateLimit, RequestContext, Result,
    ServiceKey, ServiceKeyCreatePayload, ServiceKeyDeletePayload, ServiceKeyGetPayload,
    ServiceKeyList, ServiceKeyListPayload, ServiceKeySetTokenPayload,
};

use crate::service::KeyService;

pub struct ProxyCacheConfig {
    pub ttl: Duration,
    pub keys_capacity: u64,
    pub service_keys_capacity: u64,
    pub refresh_channel_capacity: usize,
}

struct RefreshOrder {
    cache_key: String,
    payload: KeysCheckPayload,
    caller_token_hash: String,
}

pub struct ProxyCache<Inner: KeyService + 'static> {
    inner: Arc<Inner>,
    service_keys: Cache<String, ServiceKey>,
    keys: Cache<String, Key>,
    errors: Cache<String, Error>,
    refresh_tx: mpsc::Sender<RefreshOrder>,
}

impl<Inner: KeyService + 'static> ProxyCache<Inner> {
    /// Build the cache and spawn its background refresher, which drains the
    /// refresh-order channel until `shutdown` is cancelled.
    pub fn spawn(inner: Arc<Inner>, config: ProxyCacheConfig, shutdown: CancellationToken) -> Arc<Self> {
        let (refresh_tx, mut refresh_rx) = mpsc::channel(config.refresh_channel_capacity);

        let cache = Arc::new(ProxyCache {
            inner,
            service_keys: Cache::builder()
                .time_to_live(config.ttl)
                .max_capacity(config.service_keys_capacity)
                .build(),
            keys: Cache::builder().time_to_live(config.ttl).max_capacity(config.keys_capacity).build(),
            errors: Cache::builder().time_to_live(config.ttl).max_capacity(config.keys_capacity).build(),
            refresh_tx,
        });

        let refresher = cache.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    order = refresh_rx.recv() => {
                        let Some(order) = order else { break };
                        let refresher = refresher.clone();
                        // Dispatched independently so a slow call on one key
                        // never head-of-line blocks another's refresh.
                        tokio::spawn(async move { refresher.reconcile(order).await });
                    }
                }
            }
        });

        cache
    }

    fn cache_key(ksid: &str, payload: &KeysCheckPayload) -> String {
        match &payload.token {
            Some(token) => format!("{ksid}:{}", tollgate_core::generate::hash(token)),
            None => format!("{ksid}:{}", payload.kid.as_ref().expect("validated above").as_str()),
        }
    }

    async fn resolve_caller(&self, ctx: &RequestContext, caller_token_hash: &str) -> Result<ServiceKey> {
        if let Some(service_key) = self.service_keys.get(caller_token_hash).await {
            return Ok(service_key);
        }
        let service_key = self.inner.service_key_current(ctx, caller_token_hash).await?;
        self.service_keys.insert(caller_token_hash.to_string(), service_key.clone()).await;
        Ok(service_key)
    }

    /// Background reconciliation for one cached key: re-run `KeyCheck`
    /// against the inner service, which performs the real decrement, and
    /// land its answer in the cache so the next hot-path hit observes the
    /// authoritative state.
    async fn reconcile(&self, order: RefreshOrder) {
        let ctx = RequestContext::new();
        match self.inner.key_check(&ctx, order.payload, &order.caller_token_hash).await {
            Ok(key) => {
                self.errors.invalidate(&order.cache_key).await;
                self.keys.insert(order.cache_key, key).await;
            }
            Err(Error::Cancelled) => {
                // Discard without caching: a cancelled refresh carries no
                // information about the key's real state.
            }
            Err(err) => {
                self.errors.insert(order.cache_key, err).await;
            }
        }
    }

    async fn speculative_check(&self, cache_key: &str, mut key: Key) -> Result<Key> {
        let now = Utc::now();
        let Some(ratelimit) = key.ratelimit else {
            key.last_used = Some(now);
            self.keys.insert(cache_key.to_string(), key.clone()).await;
            return Ok(key);
        };
        if !ratelimit.configured() {
            key.last_used = Some(now);
            self.keys.insert(cache_key.to_string(), key.clone()).await;
            return Ok(key);
        }

        let state = ratelimit.state.unwrap_or(RateLimitState { remaining: ratelimit.limit, last_refilled: now });
        let refilled = ratelimit::refill(&ratelimit.config(), &state, now);
        if refilled.updated {
            if let Some(Error::RateLimitExceeded) = self.errors.get(cache_key).await {
                self.errors.invalidate(cache_key).await;
            }
        }

        if refilled.state.remaining <= 0 {
            key.ratelimit = Some(RateLimit { state: Some(refilled.state), ..ratelimit });
            self.keys.insert(cache_key.to_string(), key).await;
            self.errors.insert(cache_key.to_string(), Error::RateLimitExceeded).await;
            return Err(Error::RateLimitExceeded);
        }

        let remaining = (refilled.state.remaining - 1).max(0);
        key.last_used = Some(now);
        key.ratelimit = Some(RateLimit {
            state: Some(RateLimitState { remaining, last_refilled: refilled.state.last_refilled }),
            ..ratelimit
        });
        self.errors.invalidate(cache_key).await;
        self.keys.insert(cache_key.to_string(), key.clone()).await;
        Ok(key)
    }
}

#[async_trait]
impl<Inner: KeyService + 'static> KeyService for ProxyCache<Inner> {
    async fn key_check(&self, ctx: &RequestContext, payload: KeysCheckPayload, caller_token_hash: &str) -> Result<Key> {
        ctx.check()?;
        let caller = self.resolve_caller(ctx, caller_token_hash).await?;
        let ksid = payload.ksid.as_ref().expect("validated above");
        if !(caller.admin || caller.keyspaces_policies.can(Action::Read, ksid.as_str())) {
            return Err(Error::Unauthorized);
        }

        let cache_key = Self::cache_key(ksid.as_str(), &payload);

        if let Some(Error::KeyExpired) = self.errors.get(&cache_key).await {
            return Err(Error::KeyExpired);
        }

        match self.keys.get(&cache_key).await {
            None => match self.inner.key_check(ctx, payload, caller_token_hash).await {
                Ok(key) => {
                    self.errors.invalidate(&cache_key).await;
                    self.keys.insert(cache_key, key.clone()).await;
                    Ok(key)
                }
                Err(err) => {
                    self.errors.insert(cache_key, err.clone()).await;
                    Err(err)
                }
            },
            Some(key) => {
                let order = RefreshOrder {
                    cache_key: cache_key.clone(),
                    payload,
                    caller_token_hash: caller_token_hash.to_string(),
                };
                if self.refresh_tx.try_send(order).is_err() {
                    tracing::warn!(cache_key = %cache_key, "refresh channel full, dropping refresh order");
                }
                self.speculative_check(&cache_key, key).await
            }
        }
    }

    async fn key_create(&self, ctx: &RequestContext, payload: KeyCreatePayload, caller_token_hash: &str) -> Result<Key> {
        self.inner.key_create(ctx, payload, caller_token_hash).await
    }

    async fn key_get(&self, ctx: &RequestContext, payload: KeyGetPayload, caller_token_hash: &str) -> Result<Key> {
        self.inner.key_get(ctx, payload, caller_token_hash).await
    }

    async fn key_list(&self, ctx: &RequestContext, payload: KeyListPayload, caller_token_hash: &str) -> Result<KeyList> {
        self.inner.key_list(ctx, payload, caller_token_hash).await
    }

    async fn key_delete(&self, ctx: &RequestContext, payload: KeyDeletePayload, caller_token_hash: &str) -> Result<()> {
        self.inner.key_delete(ctx, payload, caller_token_hash).await
    }

    async fn keyspace_create(
        &self,
        ctx: &RequestContext,
        payload: KeyspaceCreatePayload,
        caller_token_hash: &str,
    ) -> Result<Keyspace> {
        self.inner.keyspace_create(ctx, payload, caller_token_hash).await
    }

    async fn keyspace_get(&self, ctx: &RequestContext, payload: KeyspaceGetPayload, caller_token_hash: &str) -> Result<Keyspace> {
        self.inner.keyspace_get(ctx, payload, caller_token_hash).await
    }

    async fn keyspace_list(
        &self,
        ctx: &RequestContext,
        payload: KeyspaceListPayload,
        caller_token_hash: &str,
    ) -> Result<KeyspaceList> {
        self.inner.keyspace_list(ctx, payload, caller_token_hash).await
    }

    async fn keyspace_delete(&self, ctx: &RequestContext, payload: KeyspaceDeletePayload, caller_token_hash: &str) -> Result<()> {
        self.inner.keyspace_delete(ctx, payload, caller_token_hash).await
    }

    async fn service_key_current(&self, ctx: &RequestContext, caller_token_hash: &str) -> Result<ServiceKey> {
        self.resolve_caller(ctx, caller_token_hash).await
    }

    async fn service_key_create(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeyCreatePayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKey> {
        self.inner.service_key_create(ctx, payload, caller_token_hash).await
    }

    async fn service_key_get(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeyGetPayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKey> {
        self.inner.service_key_get(ctx, payload, caller_token_hash).await
    }

    async fn service_key_list(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeyListPayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKeyList> {
        self.inner.service_key_list(ctx, payload, caller_token_hash).await
    }

    async fn service_key_delete(&self, ctx: &RequestContext, payload: ServiceKeyDeletePayload, caller_token_hash: &str) -> Result<()> {
        self.inner.service_key_delete(ctx, payload, caller_token_hash).await
    }

    async fn service_key_set_token(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeySetTokenPayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKey> {
        self.inner.service_key_set_token(ctx, payload, caller_token_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_prefers_token_hash_over_kid() {
        let payload = KeysCheckPayload {
            ksid: Some(tollgate_core::KeyspaceId::from_raw("ks_abc")),
            kid: None,
            token: Some("t_sometoken".to_string()),
        };
        let key = <ProxyCache<crate::upstream::UpstreamClient>>::cache_key("ks_abc", &payload);
        assert!(key.starts_with("ks_abc:"));
        assert_ne!(key, "ks_abc:t_sometoken");
    }

    #[test]
    fn cache_key_falls_back_to_kid() {
        let payload = KeysCheckPayload {
            ksid: Some(tollgate_core::KeyspaceId::from_raw("ks_abc")),
            kid: Some(tollgate_core::KeyId::from_raw("k_xyz")),
            token: None,
        };
        let key = <ProxyCache<crate::upstream::UpstreamClient>>::cache_key("ks_abc", &payload);
        assert_eq!(key, "ks_abc:k_xyz");
    }
}
