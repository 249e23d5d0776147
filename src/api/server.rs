use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{Router, routing::any, routing::get};
use chrono::Utc;
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{info, warn};

use super::{
    services::{serve, stats},
    state::AppState,
};
use crate::cache::{BoundedCache, snapshot};
use crate::config::{Config, PatternList};
use crate::dispatch::{Dispatcher, DispatcherConfig, PoolConfig};
use crate::engine::{EngineServices, ResourceLimits, SniffCodec};
use crate::locator::{FileLocator, HttpConfig, HttpLocator, LocatorChain, ResourceLocator};
use crate::observability::Metrics;
use crate::strategy::StrategyRegistry;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn run(
    address: Option<SocketAddr>,
    config_path: Option<PathBuf>,
) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config = match config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .map_err(|e| format!("Failed to load config: {}", e))?;

    let address = address.unwrap_or(config.server.bind_addr);
    let snapshot_path = config.cache.snapshot_path.clone();
    let state = build_state(config)?;

    if let (Some(cache), Some(path)) = (&state.cache, &snapshot_path) {
        if path.exists() {
            match snapshot::import(cache, path, Utc::now().timestamp()) {
                Ok(count) => info!(count, path = %path.display(), "Cache snapshot imported"),
                Err(err) => warn!(error = %err, path = %path.display(), "Cache snapshot import failed"),
            }
        }
    }

    let app = build_router(state.clone());

    let listener = TcpListener::bind(address).await?;
    info!(%address, "pixbox listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let (Some(cache), Some(path)) = (&state.cache, &snapshot_path) {
        match snapshot::export(cache, path, Utc::now().timestamp()) {
            Ok(count) => info!(count, path = %path.display(), "Cache snapshot exported"),
            Err(err) => warn!(error = %err, path = %path.display(), "Cache snapshot export failed"),
        }
    }

    Ok(())
}

/// Wires the full pipeline out of a loaded configuration. Needs a Tokio
/// runtime, the dispatcher spawns its workers on construction.
pub fn build_state(config: Config) -> Result<AppState, AnyError> {
    let mut locators: Vec<Arc<dyn ResourceLocator>> = vec![Arc::new(FileLocator::new(
        config.resources.root.clone(),
        config.resources.max_image_file_size,
    ))];
    if config.resources.fetch_remote {
        let allow_hosts = PatternList::compile(&config.resources.allow_hosts)?;
        locators.push(Arc::new(HttpLocator::new(HttpConfig {
            max_bytes: config.resources.max_image_file_size,
            allow_hosts,
            ..HttpConfig::default()
        })?));
    }

    let services = Arc::new(EngineServices {
        locators: LocatorChain::new(locators),
        codec: Arc::new(SniffCodec),
        limits: ResourceLimits {
            max_image_file_size: config.resources.max_image_file_size,
            max_image_resolution: config.resources.max_image_resolution,
        },
        default_max_age: config.cache.default_max_age_secs,
        remote_enabled: config.resources.fetch_remote,
    });

    let cache = config
        .cache
        .enabled
        .then(|| Arc::new(BoundedCache::new(config.cache.capacity, config.cache.max_entry_size)));

    let resolver = StrategyRegistry::with_defaults().resolver(&config.strategies.order)?;
    let metrics = Arc::new(Metrics::new());

    let dispatcher = Dispatcher::new(
        DispatcherConfig {
            pool: PoolConfig {
                core_pool_size: config.dispatcher.core_pool_size,
                max_pool_size: config.dispatcher.max_pool_size,
                keep_alive: config.dispatcher.keep_alive(),
                queue_capacity: config.dispatcher.queue_capacity,
                task_timeout: config.dispatcher.task_timeout(),
            },
            use_host_pool: config.dispatcher.use_host_pool,
            enable_post: config.http.enable_post,
        },
        resolver,
        Arc::clone(&services),
        cache.clone(),
        Arc::clone(&metrics),
    );

    let stats_allow = PatternList::compile(&config.server.stats_allow_from)?;
    Ok(AppState::new(config, dispatcher, cache, metrics, stats_allow))
}

pub fn build_router(state: AppState) -> Router {
    let stats_path = state.config.server.stats_path.clone();
    Router::new()
        .route(&stats_path, get(stats))
        .route("/", any(serve))
        .route("/{*path}", any(serve))
        .with_state(state)
        // Automatically decompress gzip request bodies
        // Handles Content-Encoding header transparently at the middleware level
        .layer(RequestDecompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
