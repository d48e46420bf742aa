//! Shared application state handed to every axum handler: the assembled
//! decorator pipeline, type-erased behind `KeyService` so `authoritative`,
//! `async_authoritative`, and `proxy` modes share one handler surface.

use std::sync::Arc;

use crate::service::KeyService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn KeyService>,
}

impl AppState {
    pub fn new(service: Arc<dyn KeyService>) -> Self {
        AppState { service }
    }
}
