use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tollgate_api::authoritative::Authoritative;
use tollgate_api::authorizer::Authorizer;
use tollgate_api::config::Mode;
use tollgate_api::proxy_cache::{ProxyCache, ProxyCacheConfig};
use tollgate_api::upstream::UpstreamClient;
use tollgate_api::validator::Validator;
use tollgate_api::{AppState, KeyService, ServerConfig};
use tollgate_core::RequestContext;
use tollgate_store::{LmdbStore, MemoryStore, Store};

#[tokio::main]
async fn main() {
    let config = ServerConfig::from_env();
    tollgate_api::telemetry::init(config.log_json);

    let shutdown = CancellationToken::new();

    let service: Arc<dyn KeyService> = match (&config.mode, &config.data_dir) {
        (Mode::Proxy, _) => build_proxy_pipeline(&config, shutdown.clone()),
        (_, Some(data_dir)) => {
            let store = Arc::new(LmdbStore::open(data_dir).unwrap_or_else(|err| {
                tracing::error!(error = %err, path = %data_dir.display(), "failed to open data directory");
                std::process::exit(1)
            }));
            install_root_key(store.as_ref(), &config).await;
            build_local_pipeline(&config, store, shutdown.clone())
        }
        (_, None) => {
            let store = Arc::new(MemoryStore::new());
            install_root_key(store.as_ref(), &config).await;
            build_local_pipeline(&config, store, shutdown.clone())
        }
    };

    let app = tollgate_api::routes::router(AppState::new(service));

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|err| {
        tracing::error!(error = %err, addr = %addr, "failed to bind listening socket");
        std::process::exit(1)
    });
    tracing::info!(addr = %addr, mode = ?config.mode, "tollgate listening");

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            serve_shutdown.cancel();
        })
        .await
        .unwrap_or_else(|err| {
            tracing::error!(error = %err, "server loop exited with an error");
            std::process::exit(1);
        });
}

async fn install_root_key<S: Store>(store: &S, config: &ServerConfig) {
    let Some(root_token) = &config.root_token else { return };
    let ctx = RequestContext::new();
    if let Err(err) = store.install_root_service_key(&ctx, root_token).await {
        tracing::error!(error = %err, "failed to install root service key");
        std::process::exit(1);
    }
}

fn build_local_pipeline<S: Store + 'static>(
    config: &ServerConfig,
    store: Arc<S>,
    shutdown: CancellationToken,
) -> Arc<dyn KeyService> {
    let authoritative = Arc::new(Authoritative::new(store.clone()));
    let authorized: Arc<Authorizer<S, Authoritative<S>>> = Arc::new(Authorizer::new(store, authoritative));

    if config.mode == Mode::AsyncAuthoritative {
        let cache = ProxyCache::spawn(authorized, proxy_cache_config(config), shutdown);
        Arc::new(Validator::new(cache))
    } else {
        Arc::new(Validator::new(authorized))
    }
}

fn build_proxy_pipeline(config: &ServerConfig, shutdown: CancellationToken) -> Arc<dyn KeyService> {
    let upstream_url = config.upstream_url.clone().unwrap_or_else(|| {
        tracing::error!("proxy mode requires TOLLGATE_UPSTREAM_URL");
        std::process::exit(1)
    });
    let upstream = Arc::new(UpstreamClient::new(upstream_url, config.upstream_timeout));
    let cache = ProxyCache::spawn(upstream, proxy_cache_config(config), shutdown);
    Arc::new(Validator::new(cache))
}

fn proxy_cache_config(config: &ServerConfig) -> ProxyCacheConfig {
    ProxyCacheConfig {
        ttl: config.cache_ttl,
        keys_capacity: config.cache_keys_capacity,
        service_keys_capacity: config.cache_service_keys_capacity,
        refresh_channel_capacity: config.refresh_channel_capacity,
    }
}
