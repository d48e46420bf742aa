//! `dashmap`-backed, process-local implementation of [`Store`]. The
//! default backend when no data directory is configured, and the backend
//! used throughout the test suite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tollgate_core::ratelimit::RateLimitState;
use tollgate_core::{
    Error, Key, KeyId, KeyList, KeyListPayload, KeyLookup, Keyspace, KeyspaceId, KeyspaceList,
    KeyspaceListPayload, Policies, RateLimit, RequestContext, Result, ServiceKey, ServiceKeyId,
    ServiceKeyList, ServiceKeyListPayload, ServiceKeyLookup,
};

use crate::pagination::paginate;
use crate::Store;

#[derive(Default)]
pub struct MemoryStore {
    keyspaces: DashMap<KeyspaceId, Keyspace>,
    keys: DashMap<KeyId, Key>,
    key_token_hashes: DashMap<KeyId, String>,
    key_by_token_hash: DashMap<String, KeyId>,
    service_keys: DashMap<ServiceKeyId, ServiceKey>,
    service_key_token_hashes: DashMap<ServiceKeyId, String>,
    service_key_by_token_hash: DashMap<String, ServiceKeyId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_keyspace(&self, _ctx: &RequestContext, keyspace: Keyspace) -> Result<Keyspace> {
        let name_taken = self
            .keyspaces
            .iter()
            .any(|e| e.deleted_at.is_none() && e.name == keyspace.name);
        if name_taken {
            return Err(Error::item_already_exists("keyspace"));
        }
        self.keyspaces.insert(keyspace.ksid.clone(), keyspace.clone());
        Ok(keyspace)
    }

    async fn get_keyspace(&self, _ctx: &RequestContext, ksid: &KeyspaceId) -> Result<Keyspace> {
        self.keyspaces
            .get(ksid)
            .filter(|e| e.deleted_at.is_none())
            .map(|e| e.clone())
            .ok_or_else(|| Error::item_not_found("keyspace"))
    }

    async fn list_keyspaces(
        &self,
        _ctx: &RequestContext,
        payload: &KeyspaceListPayload,
    ) -> Result<KeyspaceList> {
        let mut items: Vec<Keyspace> = self
            .keyspaces
            .iter()
            .filter(|e| e.deleted_at.is_none())
            .filter(|e| match &payload.filter_by_skid_policies {
                Some(skid) => self
                    .service_keys
                    .get(&ServiceKeyId::from_raw(skid.clone()))
                    .is_some_and(|sk| {
                        sk.keyspaces_policies.get(e.ksid.as_str()).is_some()
                            || sk.keyspaces_policies.get(tollgate_core::WILDCARD).is_some()
                    }),
                None => true,
            })
            .map(|e| e.clone())
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        let (metadata, keyspaces) = paginate(&items, &payload.list);
        Ok(KeyspaceList { metadata, keyspaces })
    }

    async fn delete_keyspace(
        &self,
        _ctx: &RequestContext,
        ksid: &KeyspaceId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        {
            let mut entry = self
                .keyspaces
                .get_mut(ksid)
                .filter(|e| e.deleted_at.is_none())
                .ok_or_else(|| Error::item_not_found("keyspace"))?;
            entry.deleted_at = Some(now);
        }
        for mut key in self.keys.iter_mut() {
            if &key.ksid == ksid && key.deleted_at.is_none() {
                key.deleted_at = Some(now);
            }
        }
        Ok(())
    }

    async fn create_key(&self, _ctx: &RequestContext, mut key: Key, token_hash: String) -> Result<Key> {
        let returned = key.clone();
        key.token = None;
        self.key_token_hashes.insert(key.kid.clone(), token_hash.clone());
        self.key_by_token_hash.insert(token_hash, key.kid.clone());
        self.keys.insert(key.kid.clone(), key);
        Ok(returned)
    }

    async fn get_key(&self, _ctx: &RequestContext, ksid: &KeyspaceId, lookup: &KeyLookup) -> Result<Key> {
        let kid = match lookup {
            KeyLookup::ById(kid) => kid.clone(),
            KeyLookup::ByToken(token) => {
                let hash = tollgate_core::generate::hash(token);
                self.key_by_token_hash
                    .get(&hash)
                    .map(|e| e.clone())
                    .ok_or_else(|| Error::item_not_found("key"))?
            }
        };
        self.keys
            .get(&kid)
            .filter(|e| e.deleted_at.is_none() && &e.ksid == ksid)
            .map(|e| e.clone())
            .ok_or_else(|| Error::item_not_found("key"))
    }

    async fn list_keys(&self, _ctx: &RequestContext, payload: &KeyListPayload) -> Result<KeyList> {
        let ksid = payload.ksid.as_ref();
        let mut items: Vec<Key> = self
            .keys
            .iter()
            .filter(|e| e.deleted_at.is_none())
            .filter(|e| match ksid {
                Some(ksid) => &e.ksid == ksid,
                None => true,
            })
            .map(|e| e.clone())
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let (metadata, keys) = paginate(&items, &payload.list);
        Ok(KeyList { metadata, keys })
    }

    async fn delete_key(&self, _ctx: &RequestContext, ksid: &KeyspaceId, kid: &KeyId, now: DateTime<Utc>) -> Result<()> {
        let mut entry = self
            .keys
            .get_mut(kid)
            .filter(|e| e.deleted_at.is_none() && &e.ksid == ksid)
            .ok_or_else(|| Error::item_not_found("key"))?;
        entry.deleted_at = Some(now);
        Ok(())
    }

    async fn update_key_last_used(&self, _ctx: &RequestContext, kid: &KeyId, now: DateTime<Utc>) -> Result<()> {
        let mut entry = self
            .keys
            .get_mut(kid)
            .filter(|e| e.deleted_at.is_none())
            .ok_or_else(|| Error::item_not_found("key"))?;
        entry.last_used = Some(now);
        Ok(())
    }

    async fn decrement_key_remaining(&self, _ctx: &RequestContext, kid: &KeyId, now: DateTime<Utc>) -> Result<i64> {
        let mut entry = self
            .keys
            .get_mut(kid)
            .filter(|e| e.deleted_at.is_none())
            .ok_or_else(|| Error::item_not_found("key"))?;
        let ratelimit = entry
            .ratelimit
            .as_mut()
            .ok_or_else(|| Error::invalid_payload("decrement_key_remaining called without a configured rate limit"))?;
        let state = ratelimit.state.unwrap_or(RateLimitState { remaining: ratelimit.limit, last_refilled: now });
        let new_remaining = state.remaining - 1;
        ratelimit.state = Some(RateLimitState { remaining: new_remaining, last_refilled: state.last_refilled });
        Ok(new_remaining)
    }

    async fn set_key_remaining(
        &self,
        _ctx: &RequestContext,
        kid: &KeyId,
        remaining: i64,
        last_refilled: DateTime<Utc>,
    ) -> Result<()> {
        let mut entry = self
            .keys
            .get_mut(kid)
            .filter(|e| e.deleted_at.is_none())
            .ok_or_else(|| Error::item_not_found("key"))?;
        if let Some(ratelimit) = entry.ratelimit.as_mut() {
            ratelimit.state = Some(RateLimitState { remaining, last_refilled });
        }
        Ok(())
    }

    async fn materialize_inherited_rate_limit(
        &self,
        _ctx: &RequestContext,
        kid: &KeyId,
        rate_limit: RateLimit,
    ) -> Result<()> {
        let mut entry = self
            .keys
            .get_mut(kid)
            .filter(|e| e.deleted_at.is_none())
            .ok_or_else(|| Error::item_not_found("key"))?;
        if entry.ratelimit.is_none() {
            entry.ratelimit = Some(rate_limit);
        }
        Ok(())
    }

    async fn create_service_key(
        &self,
        _ctx: &RequestContext,
        mut service_key: ServiceKey,
        token_hash: String,
    ) -> Result<ServiceKey> {
        let returned = service_key.clone();
        service_key.token = None;
        self.service_key_token_hashes
            .insert(service_key.skid.clone(), token_hash.clone());
        self.service_key_by_token_hash
            .insert(token_hash, service_key.skid.clone());
        self.service_keys.insert(service_key.skid.clone(), service_key);
        Ok(returned)
    }

    async fn get_service_key(&self, _ctx: &RequestContext, lookup: &ServiceKeyLookup) -> Result<ServiceKey> {
        let skid = match lookup {
            ServiceKeyLookup::BySkid(skid) => skid.clone(),
            ServiceKeyLookup::ByTokenHash(hash) => self
                .service_key_by_token_hash
                .get(hash)
                .map(|e| e.clone())
                .ok_or_else(|| Error::item_not_found("service key"))?,
        };
        self.service_keys
            .get(&skid)
            .filter(|e| e.deleted_at.is_none())
            .map(|e| e.clone())
            .ok_or_else(|| Error::item_not_found("service key"))
    }

    async fn list_service_keys(
        &self,
        _ctx: &RequestContext,
        payload: &ServiceKeyListPayload,
    ) -> Result<ServiceKeyList> {
        let mut items: Vec<ServiceKey> = self
            .service_keys
            .iter()
            .filter(|e| e.deleted_at.is_none())
            .map(|e| e.clone())
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let (metadata, service_keys) = paginate(&items, &payload.list);
        Ok(ServiceKeyList { metadata, service_keys })
    }

    async fn delete_service_key(&self, _ctx: &RequestContext, skid: &ServiceKeyId) -> Result<()> {
        let mut entry = self
            .service_keys
            .get_mut(skid)
            .filter(|e| e.deleted_at.is_none())
            .ok_or_else(|| Error::item_not_found("service key"))?;
        entry.deleted_at = Some(Utc::now());
        entry.keyspaces_policies = Policies::new();
        Ok(())
    }

    async fn set_keyspace_policies(&self, _ctx: &RequestContext, skid: &ServiceKeyId, policies: Policies) -> Result<()> {
        let mut entry = self
            .service_keys
            .get_mut(skid)
            .filter(|e| e.deleted_at.is_none())
            .ok_or_else(|| Error::item_not_found("service key"))?;
        entry.keyspaces_policies = policies;
        Ok(())
    }

    async fn set_service_key_token(&self, _ctx: &RequestContext, skid: &ServiceKeyId, token_hash: String) -> Result<()> {
        if !self.service_keys.contains_key(skid) {
            return Err(Error::item_not_found("service key"));
        }
        if let Some((_, old_hash)) = self.service_key_token_hashes.remove(skid) {
            self.service_key_by_token_hash.remove(&old_hash);
        }
        self.service_key_token_hashes.insert(skid.clone(), token_hash.clone());
        self.service_key_by_token_hash.insert(token_hash, skid.clone());
        Ok(())
    }

    async fn get_keyspace_policies(&self, _ctx: &RequestContext, skid: &ServiceKeyId) -> Result<Policies> {
        self.service_keys
            .get(skid)
            .filter(|e| e.deleted_at.is_none())
            .map(|e| e.keyspaces_policies.clone())
            .ok_or_else(|| Error::item_not_found("service key"))
    }

    async fn install_root_service_key(&self, ctx: &RequestContext, raw_token: &str) -> Result<()> {
        let root = ServiceKeyId::root();
        if self.service_keys.contains_key(&root) {
            return Ok(());
        }
        let mut policies = Policies::new();
        policies.insert(tollgate_core::WILDCARD, tollgate_core::Policy { read: true, write: true });
        let service_key = ServiceKey {
            skid: root,
            description: "bootstrap root service key".to_string(),
            admin: true,
            token: Some(raw_token.to_string()),
            keyspaces_policies: policies,
            created_at: Utc::now(),
            deleted_at: None,
        };
        let hash = tollgate_core::generate::hash(raw_token);
        self.create_service_key(ctx, service_key, hash).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tollgate_core::{KeyspaceId, RateLimit, Millis};

    fn ctx() -> RequestContext {
        RequestContext::new()
    }

    fn keyspace(name: &str) -> Keyspace {
        Keyspace {
            ksid: KeyspaceId::generate(),
            name: name.to_string(),
            keys_prefix: "pfx_".to_string(),
            ratelimit: None,
            deleted_at: None,
        }
    }

    fn key_with_limit(ksid: KeyspaceId, limit: i64) -> Key {
        let now = Utc::now();
        Key {
            kid: KeyId::generate(),
            ksid,
            token: None,
            last_used: None,
            expires_at: now + Duration::hours(1),
            created_at: now,
            deleted_at: None,
            ratelimit: Some(RateLimit {
                limit,
                refill_rate: 1,
                refill_interval: Millis(60_000),
                state: None,
            }),
        }
    }

    #[tokio::test]
    async fn duplicate_keyspace_name_is_rejected() {
        let store = MemoryStore::new();
        store.create_keyspace(&ctx(), keyspace("prod")).await.unwrap();
        let err = store.create_keyspace(&ctx(), keyspace("prod")).await.unwrap_err();
        assert_eq!(err, Error::item_already_exists("keyspace"));
    }

    #[tokio::test]
    async fn deleted_keyspace_is_invisible_to_get_and_list() {
        let store = MemoryStore::new();
        let ks = store.create_keyspace(&ctx(), keyspace("prod")).await.unwrap();
        store.delete_keyspace(&ctx(), &ks.ksid, Utc::now()).await.unwrap();
        assert_eq!(
            store.get_keyspace(&ctx(), &ks.ksid).await.unwrap_err(),
            Error::item_not_found("keyspace")
        );
        let listed = store
            .list_keyspaces(&ctx(), &KeyspaceListPayload::default())
            .await
            .unwrap();
        assert!(listed.keyspaces.is_empty());
    }

    #[tokio::test]
    async fn deleting_keyspace_cascades_to_its_keys() {
        let store = MemoryStore::new();
        let ks = store.create_keyspace(&ctx(), keyspace("prod")).await.unwrap();
        let key = store
            .create_key(&ctx(), key_with_limit(ks.ksid.clone(), 10), "hash".to_string())
            .await
            .unwrap();
        store.delete_keyspace(&ctx(), &ks.ksid, Utc::now()).await.unwrap();
        assert_eq!(
            store
                .get_key(&ctx(), &ks.ksid, &KeyLookup::ById(key.kid.clone()))
                .await
                .unwrap_err(),
            Error::item_not_found("key")
        );
    }

    #[tokio::test]
    async fn concurrent_decrements_each_observe_a_distinct_value() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let ks = store.create_keyspace(&ctx(), keyspace("prod")).await.unwrap();
        let key = store
            .create_key(&ctx(), key_with_limit(ks.ksid, 100), "hash".to_string())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            let kid = key.kid.clone();
            handles.push(tokio::spawn(async move {
                store.decrement_key_remaining(&RequestContext::new(), &kid, Utc::now()).await.unwrap()
            }));
        }
        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }
        results.sort();
        results.dedup();
        assert_eq!(results.len(), 20, "every concurrent decrement must see a distinct remaining value");
    }

    #[tokio::test]
    async fn decrement_is_unconditional_and_may_go_negative() {
        let store = MemoryStore::new();
        let ks = store.create_keyspace(&ctx(), keyspace("prod")).await.unwrap();
        let key = store
            .create_key(&ctx(), key_with_limit(ks.ksid, 1), "hash".to_string())
            .await
            .unwrap();
        let now = Utc::now();
        assert_eq!(store.decrement_key_remaining(&ctx(), &key.kid, now).await.unwrap(), 0);
        assert_eq!(store.decrement_key_remaining(&ctx(), &key.kid, now).await.unwrap(), -1);
    }

    #[tokio::test]
    async fn install_root_service_key_is_idempotent() {
        let store = MemoryStore::new();
        store.install_root_service_key(&ctx(), "root-token").await.unwrap();
        store.install_root_service_key(&ctx(), "root-token-2").await.unwrap();
        let root = store
            .get_service_key(&ctx(), &ServiceKeyLookup::BySkid(ServiceKeyId::root()))
            .await
            .unwrap();
        assert!(root.admin);
    }
}
