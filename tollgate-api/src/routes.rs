//! The `/v1/<namespace>.<action>` JSON-over-HTTP surface and the
//! unauthenticated health check.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tollgate_core::{
    KeyCreatePayload, KeyDeletePayload, KeyGetPayload, KeyListPayload, KeyspaceCreatePayload,
    KeyspaceDeletePayload, KeyspaceGetPayload, KeyspaceListPayload, KeysCheckPayload,
    RequestContext, ServiceKeyCreatePayload, ServiceKeyDeletePayload, ServiceKeyGetPayload,
    ServiceKeyListPayload, ServiceKeySetTokenPayload,
};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiResult;
use crate::middleware::CallerTokenHash;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/keys.check", post(keys_check))
        .route("/v1/keys.create", post(keys_create))
        .route("/v1/keys.get", post(keys_get))
        .route("/v1/keys.list", post(keys_list))
        .route("/v1/keys.delete", post(keys_delete))
        .route("/v1/keyspaces.get", post(keyspaces_get))
        .route("/v1/keyspaces.create", post(keyspaces_create))
        .route("/v1/keyspaces.list", post(keyspaces_list))
        .route("/v1/keyspaces.delete", post(keyspaces_delete))
        .route("/v1/serviceKeys.current", post(service_keys_current))
        .route("/v1/serviceKeys.get", post(service_keys_get))
        .route("/v1/serviceKeys.create", post(service_keys_create))
        .route("/v1/serviceKeys.list", post(service_keys_list))
        .route("/v1/serviceKeys.delete", post(service_keys_delete))
        .route("/v1/serviceKeys.set_token", post(service_keys_set_token))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "healthy": true }))
}

/// A delete that succeeded maps to a bare `204`.
struct NoContent;

impl IntoResponse for NoContent {
    fn into_response(self) -> Response {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn keys_check(
    State(state): State<AppState>,
    CallerTokenHash(caller_token_hash): CallerTokenHash,
    Json(payload): Json<KeysCheckPayload>,
) -> ApiResult<Response> {
    let ctx = RequestContext::new();
    let key = state.service.key_check(&ctx, payload, &caller_token_hash).await?;
    Ok(Json(key).into_response())
}

async fn keys_create(
    State(state): State<AppState>,
    CallerTokenHash(caller_token_hash): CallerTokenHash,
    Json(payload): Json<KeyCreatePayload>,
) -> ApiResult<Response> {
    let ctx = RequestContext::new();
    let key = state.service.key_create(&ctx, payload, &caller_token_hash).await?;
    Ok(Json(key).into_response())
}

async fn keys_get(
    State(state): State<AppState>,
    CallerTokenHash(caller_token_hash): CallerTokenHash,
    Json(payload): Json<KeyGetPayload>,
) -> ApiResult<Response> {
    let ctx = RequestContext::new();
    let key = state.service.key_get(&ctx, payload, &caller_token_hash).await?;
    Ok(Json(key).into_response())
}

async fn keys_list(
    State(state): State<AppState>,
    CallerTokenHash(caller_token_hash): CallerTokenHash,
    Json(payload): Json<KeyListPayload>,
) -> ApiResult<Response> {
    let ctx = RequestContext::new();
    let list = state.service.key_list(&ctx, payload, &caller_token_hash).await?;
    Ok(Json(list).into_response())
}

async fn keys_delete(
    State(state): State<AppState>,
    CallerTokenHash(caller_token_hash): CallerTokenHash,
    Json(payload): Json<KeyDeletePayload>,
) -> ApiResult<Response> {
    let ctx = RequestContext::new();
    state.service.key_delete(&ctx, payload, &caller_token_hash).await?;
    Ok(NoContent.into_response())
}

async fn keyspaces_get(
    State(state): State<AppState>,
    CallerTokenHash(caller_token_hash): CallerTokenHash,
    Json(payload): Json<KeyspaceGetPayload>,
) -> ApiResult<Response> {
    let ctx = RequestContext::new();
    let keyspace = state.service.keyspace_get(&ctx, payload, &caller_token_hash).await?;
    Ok(Json(keyspace).into_response())
}

async fn keyspaces_create(
    State(state): State<AppState>,
    CallerTokenHash(caller_token_hash): CallerTokenHash,
    Json(payload): Json<KeyspaceCreatePayload>,
) -> ApiResult<Response> {
    let ctx = RequestContext::new();
    let keyspace = state.service.keyspace_create(&ctx, payload, &caller_token_hash).await?;
    Ok(Json(keyspace).into_response())
}

async fn keyspaces_list(
    State(state): State<AppState>,
    CallerTokenHash(caller_token_hash): CallerTokenHash,
    Json(payload): Json<KeyspaceListPayload>,
) -> ApiResult<Response> {
    let ctx = RequestContext::new();
    let list = state.service.keyspace_list(&ctx, payload, &caller_token_hash).await?;
    Ok(Json(list).into_response())
}

async fn keyspaces_delete(
    State(state): State<AppState>,
    CallerTokenHash(caller_token_hash): CallerTokenHash,
    Json(payload): Json<KeyspaceDeletePayload>,
) -> ApiResult<Response> {
    let ctx = RequestContext::new();
    state.service.keyspace_delete(&ctx, payload, &caller_token_hash).await?;
    Ok(NoContent.into_response())
}

async fn service_keys_current(
    State(state): State<AppState>,
    CallerTokenHash(caller_token_hash): CallerTokenHash,
) -> ApiResult<Response> {
    let ctx = RequestContext::new();
    let service_key = state.service.service_key_current(&ctx, &caller_token_hash).await?;
    Ok(Json(service_key).into_response())
}

async fn service_keys_get(
    State(state): State<AppState>,
    CallerTokenHash(caller_token_hash): CallerTokenHash,
    Json(payload): Json<ServiceKeyGetPayload>,
) -> ApiResult<Response> {
    let ctx = RequestContext::new();
    let service_key = state.service.service_key_get(&ctx, payload, &caller_token_hash).await?;
    Ok(Json(service_key).into_response())
}

async fn service_keys_create(
    State(state): State<AppState>,
    CallerTokenHash(caller_token_hash): CallerTokenHash,
    Json(payload): Json<ServiceKeyCreatePayload>,
) -> ApiResult<Response> {
    let ctx = RequestContext::new();
    let service_key = state.service.service_key_create(&ctx, payload, &caller_token_hash).await?;
    Ok(Json(service_key).into_response())
}

async fn service_keys_list(
    State(state): State<AppState>,
    CallerTokenHash(caller_token_hash): CallerTokenHash,
    Json(payload): Json<ServiceKeyListPayload>,
) -> ApiResult<Response> {
    let ctx = RequestContext::new();
    let list = state.service.service_key_list(&ctx, payload, &caller_token_hash).await?;
    Ok(Json(list).into_response())
}

async fn service_keys_delete(
    State(state): State<AppState>,
    CallerTokenHash(caller_token_hash): CallerTokenHash,
    Json(payload): Json<ServiceKeyDeletePayload>,
) -> ApiResult<Response> {
    let ctx = RequestContext::new();
    state.service.service_key_delete(&ctx, payload, &caller_token_hash).await?;
    Ok(NoContent.into_response())
}

async fn service_keys_set_token(
    State(state): State<AppState>,
    CallerTokenHash(caller_token_hash): CallerTokenHash,
    Json(payload): Json<ServiceKeySetTokenPayload>,
) -> ApiResult<Response> {
    let ctx = RequestContext::new();
    let service_key = state.service.service_key_set_token(&ctx, payload, &caller_token_hash).await?;
    Ok(Json(service_key).into_response())
}
