pub mod authoritative;
pub mod authorizer;
pub mod config;
pub mod error;
pub mod middleware;
pub mod proxy_cache;
pub mod routes;
pub mod service;
pub mod state;
pub mod telemetry;
pub mod upstream;
pub mod validator;

pub use config::{Mode, ServerConfig};
pub use service::KeyService;
pub use state::AppState;
