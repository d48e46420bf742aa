//! `heed`-backed implementation of [`Store`], used when a data directory is
//! configured. Mirrors [`crate::memory::MemoryStore`]'s semantics exactly;
//! durability is the only externally observable difference.
//!
//! Every public method offloads its `heed` transaction onto
//! `tokio::task::spawn_blocking`, since `heed`'s transactions are
//! synchronous and would otherwise stall the async runtime's worker thread
//! for the duration of the disk I/O.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use heed::types::{SerdeJson, Str};
use heed::{Database, Env, EnvOpenOptions};
use tollgate_core::ratelimit::RateLimitState;
use tollgate_core::{
    Error, Key, KeyId, KeyList, KeyListPayload, KeyLookup, Keyspace, KeyspaceId, KeyspaceList,
    KeyspaceListPayload, Policies, RateLimit, RequestContext, Result, ServiceKey, ServiceKeyId,
    ServiceKeyList, ServiceKeyListPayload, ServiceKeyLookup,
};

use async_trait::async_trait;

use crate::pagination::paginate;
use crate::Store;

type JsonDb<V> = Database<Str, SerdeJson<V>>;

struct Dbs {
    env: Env,
    keyspaces: JsonDb<Keyspace>,
    keys: JsonDb<Key>,
    key_token_hashes: JsonDb<String>,
    key_by_token_hash: JsonDb<String>,
    service_keys: JsonDb<ServiceKey>,
    service_key_token_hashes: JsonDb<String>,
    service_key_by_token_hash: JsonDb<String>,
}

pub struct LmdbStore {
    dbs: Arc<Dbs>,
}

impl LmdbStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path).map_err(|e| Error::invalid_payload(e.to_string()))?;
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(1024 * 1024 * 1024)
                .max_dbs(8)
                .open(path)
        }
        .map_err(|e| Error::invalid_payload(e.to_string()))?;

        let mut txn = env.write_txn().map_err(|e| Error::invalid_payload(e.to_string()))?;
        let keyspaces: JsonDb<Keyspace> = env.create_database(&mut txn, Some("keyspaces")).map_err(db_err)?;
        let keys: JsonDb<Key> = env.create_database(&mut txn, Some("keys")).map_err(db_err)?;
        let key_token_hashes: JsonDb<String> =
            env.create_database(&mut txn, Some("key_token_hashes")).map_err(db_err)?;
        let key_by_token_hash: JsonDb<String> =
            env.create_database(&mut txn, Some("key_by_token_hash")).map_err(db_err)?;
        let service_keys: JsonDb<ServiceKey> =
            env.create_database(&mut txn, Some("service_keys")).map_err(db_err)?;
        let service_key_token_hashes: JsonDb<String> =
            env.create_database(&mut txn, Some("service_key_token_hashes")).map_err(db_err)?;
        let service_key_by_token_hash: JsonDb<String> =
            env.create_database(&mut txn, Some("service_key_by_token_hash")).map_err(db_err)?;
        txn.commit().map_err(db_err)?;

        Ok(LmdbStore {
            dbs: Arc::new(Dbs {
                env,
                keyspaces,
                keys,
                key_token_hashes,
                key_by_token_hash,
                service_keys,
                service_key_token_hashes,
                service_key_by_token_hash,
            }),
        })
    }

    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Dbs) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let dbs = self.dbs.clone();
        tokio::task::spawn_blocking(move || f(&dbs))
            .await
            .map_err(|e| Error::invalid_payload(e.to_string()))?
    }
}

fn db_err(e: heed::Error) -> Error {
    Error::invalid_payload(e.to_string())
}

#[async_trait]
impl Store for LmdbStore {
    async fn create_keyspace(&self, _ctx: &RequestContext, keyspace: Keyspace) -> Result<Keyspace> {
        self.run(move |dbs| {
            let mut txn = dbs.env.write_txn().map_err(db_err)?;
            let taken = dbs
                .keyspaces
                .iter(&txn)
                .map_err(db_err)?
                .filter_map(|r| r.ok())
                .any(|(_, v)| v.deleted_at.is_none() && v.name == keyspace.name);
            if taken {
                return Err(Error::item_already_exists("keyspace"));
            }
            dbs.keyspaces.put(&mut txn, keyspace.ksid.as_str(), &keyspace).map_err(db_err)?;
            txn.commit().map_err(db_err)?;
            Ok(keyspace)
        })
        .await
    }

    async fn get_keyspace(&self, _ctx: &RequestContext, ksid: &KeyspaceId) -> Result<Keyspace> {
        let ksid = ksid.clone();
        self.run(move |dbs| {
            let txn = dbs.env.read_txn().map_err(db_err)?;
            dbs.keyspaces
                .get(&txn, ksid.as_str())
                .map_err(db_err)?
                .filter(|e| e.deleted_at.is_none())
                .ok_or_else(|| Error::item_not_found("keyspace"))
        })
        .await
    }

    async fn list_keyspaces(&self, _ctx: &RequestContext, payload: &KeyspaceListPayload) -> Result<KeyspaceList> {
        let payload = payload.clone();
        self.run(move |dbs| {
            let txn = dbs.env.read_txn().map_err(db_err)?;
            let mut items: Vec<Keyspace> = dbs
                .keyspaces
                .iter(&txn)
                .map_err(db_err)?
                .filter_map(|r| r.ok())
                .map(|(_, v)| v)
                .filter(|e| e.deleted_at.is_none())
                .filter(|e| match &payload.filter_by_skid_policies {
                    Some(skid) => dbs
                        .service_keys
                        .get(&txn, skid)
                        .ok()
                        .flatten()
                        .is_some_and(|sk| {
                            sk.keyspaces_policies.get(e.ksid.as_str()).is_some()
                                || sk.keyspaces_policies.get(tollgate_core::WILDCARD).is_some()
                        }),
                    None => true,
                })
                .collect();
            items.sort_by(|a, b| a.name.cmp(&b.name));
            let (metadata, keyspaces) = paginate(&items, &payload.list);
            Ok(KeyspaceList { metadata, keyspaces })
        })
        .await
    }

    async fn delete_keyspace(&self, _ctx: &RequestContext, ksid: &KeyspaceId, now: DateTime<Utc>) -> Result<()> {
        let ksid = ksid.clone();
        self.run(move |dbs| {
            let mut txn = dbs.env.write_txn().map_err(db_err)?;
            let mut keyspace = dbs
                .keyspaces
                .get(&txn, ksid.as_str())
                .map_err(db_err)?
                .filter(|e| e.deleted_at.is_none())
                .ok_or_else(|| Error::item_not_found("keyspace"))?;
            keyspace.deleted_at = Some(now);
            dbs.keyspaces.put(&mut txn, ksid.as_str(), &keyspace).map_err(db_err)?;

            let affected: Vec<(String, Key)> = dbs
                .keys
                .iter(&txn)
                .map_err(db_err)?
                .filter_map(|r| r.ok())
                .filter(|(_, k)| k.ksid == ksid && k.deleted_at.is_none())
                .map(|(id, k)| (id.to_string(), k))
                .collect();
            for (id, mut key) in affected {
                key.deleted_at = Some(now);
                dbs.keys.put(&mut txn, &id, &key).map_err(db_err)?;
            }
            txn.commit().map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn create_key(&self, _ctx: &RequestContext, key: Key, token_hash: String) -> Result<Key> {
        self.run(move |dbs| {
            let mut txn = dbs.env.write_txn().map_err(db_err)?;
            let returned = key.clone();
            let mut stored = key;
            stored.token = None;
            dbs.keys.put(&mut txn, stored.kid.as_str(), &stored).map_err(db_err)?;
            dbs.key_token_hashes.put(&mut txn, stored.kid.as_str(), &token_hash).map_err(db_err)?;
            dbs.key_by_token_hash.put(&mut txn, &token_hash, &stored.kid.as_str().to_string()).map_err(db_err)?;
            txn.commit().map_err(db_err)?;
            Ok(returned)
        })
        .await
    }

    async fn get_key(&self, _ctx: &RequestContext, ksid: &KeyspaceId, lookup: &KeyLookup) -> Result<Key> {
        let ksid = ksid.clone();
        let lookup = lookup.clone();
        self.run(move |dbs| {
            let txn = dbs.env.read_txn().map_err(db_err)?;
            let kid = match &lookup {
                KeyLookup::ById(kid) => kid.as_str().to_string(),
                KeyLookup::ByToken(token) => {
                    let hash = tollgate_core::generate::hash(token);
                    dbs.key_by_token_hash
                        .get(&txn, &hash)
                        .map_err(db_err)?
                        .ok_or_else(|| Error::item_not_found("key"))?
                }
            };
            dbs.keys
                .get(&txn, &kid)
                .map_err(db_err)?
                .filter(|e| e.deleted_at.is_none() && e.ksid == ksid)
                .ok_or_else(|| Error::item_not_found("key"))
        })
        .await
    }

    async fn list_keys(&self, _ctx: &RequestContext, payload: &KeyListPayload) -> Result<KeyList> {
        let payload = payload.clone();
        self.run(move |dbs| {
            let txn = dbs.env.read_txn().map_err(db_err)?;
            let mut items: Vec<Key> = dbs
                .keys
                .iter(&txn)
                .map_err(db_err)?
                .filter_map(|r| r.ok())
                .map(|(_, v)| v)
                .filter(|e| e.deleted_at.is_none())
                .filter(|e| match &payload.ksid {
                    Some(ksid) => &e.ksid == ksid,
                    None => true,
                })
                .collect();
            items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let (metadata, keys) = paginate(&items, &payload.list);
            Ok(KeyList { metadata, keys })
        })
        .await
    }

    async fn delete_key(&self, _ctx: &RequestContext, ksid: &KeyspaceId, kid: &KeyId, now: DateTime<Utc>) -> Result<()> {
        let ksid = ksid.clone();
        let kid = kid.clone();
        self.run(move |dbs| {
            let mut txn = dbs.env.write_txn().map_err(db_err)?;
            let mut key = dbs
                .keys
                .get(&txn, kid.as_str())
                .map_err(db_err)?
                .filter(|e| e.deleted_at.is_none() && e.ksid == ksid)
                .ok_or_else(|| Error::item_not_found("key"))?;
            key.deleted_at = Some(now);
            dbs.keys.put(&mut txn, kid.as_str(), &key).map_err(db_err)?;
            txn.commit().map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn update_key_last_used(&self, _ctx: &RequestContext, kid: &KeyId, now: DateTime<Utc>) -> Result<()> {
        let kid = kid.clone();
        self.run(move |dbs| {
            let mut txn = dbs.env.write_txn().map_err(db_err)?;
            let mut key = dbs
                .keys
                .get(&txn, kid.as_str())
                .map_err(db_err)?
                .filter(|e| e.deleted_at.is_none())
                .ok_or_else(|| Error::item_not_found("key"))?;
            key.last_used = Some(now);
            dbs.keys.put(&mut txn, kid.as_str(), &key).map_err(db_err)?;
            txn.commit().map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn decrement_key_remaining(&self, _ctx: &RequestContext, kid: &KeyId, now: DateTime<Utc>) -> Result<i64> {
        let kid = kid.clone();
        self.run(move |dbs| {
            let mut txn = dbs.env.write_txn().map_err(db_err)?;
            let mut key = dbs
                .keys
                .get(&txn, kid.as_str())
                .map_err(db_err)?
                .filter(|e| e.deleted_at.is_none())
                .ok_or_else(|| Error::item_not_found("key"))?;
            let ratelimit = key
                .ratelimit
                .as_mut()
                .ok_or_else(|| Error::invalid_payload("decrement_key_remaining called without a configured rate limit"))?;
            let state = ratelimit.state.unwrap_or(RateLimitState { remaining: ratelimit.limit, last_refilled: now });
            let new_remaining = state.remaining - 1;
            ratelimit.state = Some(RateLimitState { remaining: new_remaining, last_refilled: state.last_refilled });
            dbs.keys.put(&mut txn, kid.as_str(), &key).map_err(db_err)?;
            txn.commit().map_err(db_err)?;
            Ok(new_remaining)
        })
        .await
    }

    async fn set_key_remaining(
        &self,
        _ctx: &RequestContext,
        kid: &KeyId,
        remaining: i64,
        last_refilled: DateTime<Utc>,
    ) -> Result<()> {
        let kid = kid.clone();
        self.run(move |dbs| {
            let mut txn = dbs.env.write_txn().map_err(db_err)?;
            let mut key = dbs
                .keys
                .get(&txn, kid.as_str())
                .map_err(db_err)?
                .filter(|e| e.deleted_at.is_none())
                .ok_or_else(|| Error::item_not_found("key"))?;
            if let Some(ratelimit) = key.ratelimit.as_mut() {
                ratelimit.state = Some(RateLimitState { remaining, last_refilled });
            }
            dbs.keys.put(&mut txn, kid.as_str(), &key).map_err(db_err)?;
            txn.commit().map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn materialize_inherited_rate_limit(&self, _ctx: &RequestContext, kid: &KeyId, rate_limit: RateLimit) -> Result<()> {
        let kid = kid.clone();
        self.run(move |dbs| {
            let mut txn = dbs.env.write_txn().map_err(db_err)?;
            let mut key = dbs
                .keys
                .get(&txn, kid.as_str())
                .map_err(db_err)?
                .filter(|e| e.deleted_at.is_none())
                .ok_or_else(|| Error::item_not_found("key"))?;
            if key.ratelimit.is_none() {
                key.ratelimit = Some(rate_limit);
                dbs.keys.put(&mut txn, kid.as_str(), &key).map_err(db_err)?;
                txn.commit().map_err(db_err)?;
            }
            Ok(())
        })
        .await
    }

    async fn create_service_key(
        &self,
        _ctx: &RequestContext,
        service_key: ServiceKey,
        token_hash: String,
    ) -> Result<ServiceKey> {
        self.run(move |dbs| {
            let mut txn = dbs.env.write_txn().map_err(db_err)?;
            let returned = service_key.clone();
            let mut stored = service_key;
            stored.token = None;
            dbs.service_keys.put(&mut txn, stored.skid.as_str(), &stored).map_err(db_err)?;
            dbs.service_key_token_hashes.put(&mut txn, stored.skid.as_str(), &token_hash).map_err(db_err)?;
            dbs.service_key_by_token_hash
                .put(&mut txn, &token_hash, &stored.skid.as_str().to_string())
                .map_err(db_err)?;
            txn.commit().map_err(db_err)?;
            Ok(returned)
        })
        .await
    }

    async fn get_service_key(&self, _ctx: &RequestContext, lookup: &ServiceKeyLookup) -> Result<ServiceKey> {
        let lookup = lookup.clone();
        self.run(move |dbs| {
            let txn = dbs.env.read_txn().map_err(db_err)?;
            let skid = match &lookup {
                ServiceKeyLookup::BySkid(skid) => skid.as_str().to_string(),
                ServiceKeyLookup::ByTokenHash(hash) => dbs
                    .service_key_by_token_hash
                    .get(&txn, hash)
                    .map_err(db_err)?
                    .ok_or_else(|| Error::item_not_found("service key"))?,
            };
            dbs.service_keys
                .get(&txn, &skid)
                .map_err(db_err)?
                .filter(|e| e.deleted_at.is_none())
                .ok_or_else(|| Error::item_not_found("service key"))
        })
        .await
    }

    async fn list_service_keys(&self, _ctx: &RequestContext, payload: &ServiceKeyListPayload) -> Result<ServiceKeyList> {
        let payload = payload.clone();
        self.run(move |dbs| {
            let txn = dbs.env.read_txn().map_err(db_err)?;
            let mut items: Vec<ServiceKey> = dbs
                .service_keys
                .iter(&txn)
                .map_err(db_err)?
                .filter_map(|r| r.ok())
                .map(|(_, v)| v)
                .filter(|e| e.deleted_at.is_none())
                .collect();
            items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            let (metadata, service_keys) = paginate(&items, &payload.list);
            Ok(ServiceKeyList { metadata, service_keys })
        })
        .await
    }

    async fn delete_service_key(&self, _ctx: &RequestContext, skid: &ServiceKeyId) -> Result<()> {
        let skid = skid.clone();
        self.run(move |dbs| {
            let mut txn = dbs.env.write_txn().map_err(db_err)?;
            let mut service_key = dbs
                .service_keys
                .get(&txn, skid.as_str())
                .map_err(db_err)?
                .filter(|e| e.deleted_at.is_none())
                .ok_or_else(|| Error::item_not_found("service key"))?;
            service_key.deleted_at = Some(Utc::now());
            service_key.keyspaces_policies = Policies::new();
            dbs.service_keys.put(&mut txn, skid.as_str(), &service_key).map_err(db_err)?;
            txn.commit().map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn set_keyspace_policies(&self, _ctx: &RequestContext, skid: &ServiceKeyId, policies: Policies) -> Result<()> {
        let skid = skid.clone();
        self.run(move |dbs| {
            let mut txn = dbs.env.write_txn().map_err(db_err)?;
            let mut service_key = dbs
                .service_keys
                .get(&txn, skid.as_str())
                .map_err(db_err)?
                .filter(|e| e.deleted_at.is_none())
                .ok_or_else(|| Error::item_not_found("service key"))?;
            service_key.keyspaces_policies = policies;
            dbs.service_keys.put(&mut txn, skid.as_str(), &service_key).map_err(db_err)?;
            txn.commit().map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn set_service_key_token(&self, _ctx: &RequestContext, skid: &ServiceKeyId, token_hash: String) -> Result<()> {
        let skid = skid.clone();
        self.run(move |dbs| {
            let mut txn = dbs.env.write_txn().map_err(db_err)?;
            if dbs.service_keys.get(&txn, skid.as_str()).map_err(db_err)?.is_none() {
                return Err(Error::item_not_found("service key"));
            }
            if let Some(old_hash) = dbs.service_key_token_hashes.get(&txn, skid.as_str()).map_err(db_err)? {
                dbs.service_key_by_token_hash.delete(&mut txn, &old_hash).map_err(db_err)?;
            }
            dbs.service_key_token_hashes.put(&mut txn, skid.as_str(), &token_hash).map_err(db_err)?;
            dbs.service_key_by_token_hash
                .put(&mut txn, &token_hash, &skid.as_str().to_string())
                .map_err(db_err)?;
            txn.commit().map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn get_keyspace_policies(&self, _ctx: &RequestContext, skid: &ServiceKeyId) -> Result<Policies> {
        let skid = skid.clone();
        self.run(move |dbs| {
            let txn = dbs.env.read_txn().map_err(db_err)?;
            dbs.service_keys
                .get(&txn, skid.as_str())
                .map_err(db_err)?
                .filter(|e| e.deleted_at.is_none())
                .map(|e| e.keyspaces_policies)
                .ok_or_else(|| Error::item_not_found("service key"))
        })
        .await
    }

    async fn install_root_service_key(&self, ctx: &RequestContext, raw_token: &str) -> Result<()> {
        let root = ServiceKeyId::root();
        if self.get_service_key(ctx, &ServiceKeyLookup::BySkid(root.clone())).await.is_ok() {
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
