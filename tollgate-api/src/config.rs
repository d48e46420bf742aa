//! Server configuration, loaded from `TOLLGATE_`-prefixed environment
//! variables with sensible development defaults, in the same idiom as the
//! rest of the ecosystem's `*Config::from_env()` constructors.

use std::path::PathBuf;
use std::time::Duration;

/// Which decorator pipeline the running process assembles at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// `Validator -> Authorizer -> Authoritative -> Store`, no cache.
    Authoritative,
    /// Authoritative pipeline fronted by a [`crate::proxy_cache::ProxyCache`]
    /// that talks to the local store directly for the cache miss path.
    AsyncAuthoritative,
    /// Pure proxy: every call, cached or not, is ultimately satisfied by a
    /// remote authoritative node over HTTP.
    Proxy,
}

impl Mode {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "authoritative" => Some(Mode::Authoritative),
            "async_authoritative" => Some(Mode::AsyncAuthoritative),
            "proxy" => Some(Mode::Proxy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub mode: Mode,
    pub bind_addr: String,
    pub port: u16,
    /// Absent means an in-memory store; present means LMDB at this path.
    pub data_dir: Option<PathBuf>,
    pub cache_ttl: Duration,
    pub cache_keys_capacity: u64,
    pub cache_service_keys_capacity: u64,
    pub refresh_channel_capacity: usize,
    pub upstream_url: Option<String>,
    pub upstream_timeout: Duration,
    pub log_json: bool,
    pub root_token: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        ServerConfig {
            mode: env_parsed("TOLLGATE_MODE", Mode::from_str).unwrap_or(Mode::Authoritative),
            bind_addr: std::env::var("TOLLGATE_BIND").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parsed("TOLLGATE_PORT", |s| s.parse().ok()).unwrap_or(8080),
            data_dir: std::env::var("TOLLGATE_DATA_DIR").ok().map(PathBuf::from),
            cache_ttl: Duration::from_millis(
                env_parsed("TOLLGATE_CACHE_TTL_MS", |s| s.parse().ok()).unwrap_or(30_000),
            ),
            cache_keys_capacity: env_parsed("TOLLGATE_CACHE_KEYS_CAPACITY", |s| s.parse().ok())
                .unwrap_or(100_000),
            cache_service_keys_capacity: env_parsed(
                "TOLLGATE_CACHE_SERVICE_KEYS_CAPACITY",
                |s| s.parse().ok(),
            )
            .unwrap_or(10_000),
            refresh_channel_capacity: env_parsed("TOLLGATE_REFRESH_CHANNEL_CAPACITY", |s| {
                s.parse().ok()
            })
            .unwrap_or(1024),
            upstream_url: std::env::var("TOLLGATE_UPSTREAM_URL").ok(),
            upstream_timeout: Duration::from_millis(
                env_parsed("TOLLGATE_UPSTREAM_TIMEOUT_MS", |s| s.parse().ok()).unwrap_or(5_000),
            ),
            log_json: env_parsed("TOLLGATE_LOG_JSON", |s| s.parse().ok()).unwrap_or(false),
            root_token: std::env::var("TOLLGATE_ROOT_TOKEN").ok(),
        }
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

fn env_parsed<T>(key: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
    std::env::var(key).ok().and_then(|s| parse(&s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_known_values() {
        assert_eq!(Mode::from_str("proxy"), Some(Mode::Proxy));
        assert_eq!(Mode::from_str("bogus"), None);
    }

    #[test]
    fn default_config_is_in_memory_authoritative() {
        // SAFETY: tests in this module do not run concurrently with other
        // env-var-mutating tests in this crate.
        for key in [
            "TOLLGATE_MODE",
            "TOLLGATE_DATA_DIR",
            "TOLLGATE_PORT",
        ] {
            std::env::remove_var(key);
        }
        let cfg = ServerConfig::from_env();
        assert_eq!(cfg.mode, Mode::Authoritative);
        assert!(cfg.data_dir.is_none());
        assert_eq!(cfg.port, 8080);
    }
}
