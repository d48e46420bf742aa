//! HTTP client to an upstream authoritative node. Implements the full
//! `KeyService` surface by forwarding each call as a `/v1/<namespace>.<action>`
//! POST, so it can stand in as the passthrough inner for proxy mode; the
//! proxy cache overrides only `key_check`.

use std::time::Duration;

use async_trait::async_trait;
use tollgate_core::{
    Error, Key, KeyCreatePayload, KeyDeletePayload, KeyGetPayload, KeyList, KeyListPayload,
    Keyspace, KeyspaceCreatePayload, KeyspaceDeletePayload, KeyspaceGetPayload, KeyspaceList,
    KeyspaceListPayload, KeysCheckPayload, RequestContext, Result, ServiceKey,
    ServiceKeyCreatePayload, ServiceKeyDeletePayload, ServiceKeyGetPayload, ServiceKeyList,
    ServiceKeyListPayload, ServiceKeySetTokenPayload,
};

use crate::service::KeyService;

pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client configuration is static and valid");
        UpstreamClient { http, base_url }
    }

    async fn call<B: serde::Serialize + Sync, T: for<'de> serde::Deserialize<'de>>(
        &self,
        ctx: &RequestContext,
        action: &str,
        caller_token_hash: &str,
        body: &B,
    ) -> Result<T> {
        ctx.check()?;
        let url = format!("{}/v1/{}", self.base_url, action);
        let response = self
            .http
            .post(url)
            .bearer_auth(caller_token_hash)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::invalid_payload(format!("upstream request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(status_to_error(response.status()));
        }
        response
            .json()
            .await
            .map_err(|e| Error::invalid_payload(format!("upstream response decode failed: {e}")))
    }

    async fn call_no_body<T: for<'de> serde::Deserialize<'de>>(
        &self,
        ctx: &RequestContext,
        action: &str,
        caller_token_hash: &str,
    ) -> Result<T> {
        self.call(ctx, action, caller_token_hash, &serde_json::json!({})).await
    }

    /// For delete actions: the upstream answers with an empty `204` body,
    /// so the response is never decoded as JSON.
    async fn call_expect_no_content<B: serde::Serialize + Sync>(
        &self,
        ctx: &RequestContext,
        action: &str,
        caller_token_hash: &str,
        body: &B,
    ) -> Result<()> {
        ctx.check()?;
        let url = format!("{}/v1/{}", self.base_url, action);
        let response = self
            .http
            .post(url)
            .bearer_auth(caller_token_hash)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::invalid_payload(format!("upstream request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(status_to_error(response.status()));
        }
        Ok(())
    }
}

fn status_to_error(status: reqwest::StatusCode) -> Error {
    match status.as_u16() {
        400 => Error::invalid_payload("upstream rejected payload"),
        401 => Error::Unauthorized,
        403 => Error::CannotDeleteItself,
        404 => Error::item_not_found("upstream entity"),
        409 => Error::item_already_exists("upstream entity"),
        419 => Error::KeyExpired,
        429 => Error::RateLimitExceeded,
        460 => Error::InvalidExpiration,
        _ => Error::invalid_payload(format!("upstream returned {status}")),
    }
}

#[async_trait]
impl KeyService for UpstreamClient {
    async fn key_check(&self, ctx: &RequestContext, payload: KeysCheckPayload, caller_token_hash: &str) -> Result<Key> {
        self.call(ctx, "keys.check", caller_token_hash, &payload).await
    }

    async fn key_create(&self, ctx: &RequestContext, payload: KeyCreatePayload, caller_token_hash: &str) -> Result<Key> {
        self.call(ctx, "keys.create", caller_token_hash, &payload).await
    }

    async fn key_get(&self, ctx: &RequestContext, payload: KeyGetPayload, caller_token_hash: &str) -> Result<Key> {
        self.call(ctx, "keys.get", caller_token_hash, &payload).await
    }

    async fn key_list(&self, ctx: &RequestContext, payload: KeyListPayload, caller_token_hash: &str) -> Result<KeyList> {
        self.call(ctx, "keys.list", caller_token_hash, &payload).await
    }

    async fn key_delete(&self, ctx: &RequestContext, payload: KeyDeletePayload, caller_token_hash: &str) -> Result<()> {
        self.call_expect_no_content(ctx, "keys.delete", caller_token_hash, &payload).await
    }

    async fn keyspace_create(
        &self,
        ctx: &RequestContext,
        payload: KeyspaceCreatePayload,
        caller_token_hash: &str,
    ) -> Result<Keyspace> {
        self.call(ctx, "keyspaces.create", caller_token_hash, &payload).await
    }

    async fn keyspace_get(&self, ctx: &RequestContext, payload: KeyspaceGetPayload, caller_token_hash: &str) -> Result<Keyspace> {
        self.call(ctx, "keyspaces.get", caller_token_hash, &payload).await
    }

    async fn keyspace_list(
        &self,
        ctx: &RequestContext,
        payload: KeyspaceListPayload,
        caller_token_hash: &str,
    ) -> Result<KeyspaceList> {
        self.call(ctx, "keyspaces.list", caller_token_hash, &payload).await
    }

    async fn keyspace_delete(&self, ctx: &RequestContext, payload: KeyspaceDeletePayload, caller_token_hash: &str) -> Result<()> {
        self.call_expect_no_content(ctx, "keyspaces.delete", caller_token_hash, &payload).await
    }

    async fn service_key_current(&self, ctx: &RequestContext, caller_token_hash: &str) -> Result<ServiceKey> {
        self.call_no_body(ctx, "serviceKeys.current", caller_token_hash).await
    }

    async fn service_key_create(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeyCreatePayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKey> {
        self.call(ctx, "serviceKeys.create", caller_token_hash, &payload).await
    }

    async fn service_key_get(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeyGetPayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKey> {
        self.call(ctx, "serviceKeys.get", caller_token_hash, &payload).await
    }

    async fn service_key_list(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeyListPayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKeyList> {
        self.call(ctx, "serviceKeys.list", caller_token_hash, &payload).await
    }

    async fn service_key_delete(&self, ctx: &RequestContext, payload: ServiceKeyDeletePayload, caller_token_hash: &str) -> Result<()> {
        self.call_expect_no_content(ctx, "serviceKeys.delete", caller_token_hash, &payload).await
    }

    async fn service_key_set_token(
        &self,
        ctx: &RequestContext,
        payload: ServiceKeySetTokenPayload,
        caller_token_hash: &str,
    ) -> Result<ServiceKey> {
        self.call(ctx, "serviceKeys.set_token", caller_token_hash, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_to_error_maps_every_documented_code() {
        assert_eq!(status_to_error(reqwest::StatusCode::UNAUTHORIZED), Error::Unauthorized);
        assert_eq!(status_to_error(reqwest::StatusCode::FORBIDDEN), Error::CannotDeleteItself);
        assert_eq!(status_to_error(reqwest::StatusCode::TOO_MANY_REQUESTS), Error::RateLimitExceeded);
        assert_eq!(status_to_error(reqwest::StatusCode::from_u16(419).unwrap()), Error::KeyExpired);
        assert_eq!(status_to_error(reqwest::StatusCode::from_u16(460).unwrap()), Error::InvalidExpiration);
        assert!(matches!(status_to_error(reqwest::StatusCode::NOT_FOUND), Error::NotFound { .. }));
        assert!(matches!(status_to_error(reqwest::StatusCode::CONFLICT), Error::AlreadyExists { .. }));
    }

    #[test]
    fn new_client_does_not_panic_building_its_http_client() {
        let _ = UpstreamClient::new("http://localhost:9999".to_string(), Duration::from_secs(1));
    }
}
