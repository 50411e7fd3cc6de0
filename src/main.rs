use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use transfer_indexer::{
    CursorStore, EventBus, Scanner,
    config::Config,
    rpc_pool::EndpointPoolBuilder,
    store::{CursorCache, postgres::PgStore, redis_cache::RedisCursorCache},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::parse();
    init_tracing(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "starting transfer indexer");

    let (endpoint_configs, breaker) = config.load_endpoints()?;
    let mut builder = EndpointPoolBuilder::new().circuit_breaker(breaker);
    for endpoint in endpoint_configs {
        builder = builder.endpoint(endpoint);
    }
    let pool = Arc::new(builder.build()?);
    info!(endpoints = pool.endpoints().len(), "endpoint pool configured");

    let store = Arc::new(PgStore::connect(&config.database_url).await?);

    // The cache is an optimization; a dead Redis only costs the fast path.
    let cache: Option<Arc<dyn CursorCache>> = if config.redis_enabled {
        match RedisCursorCache::connect(&config.redis_url).await {
            Ok(cache) => Some(Arc::new(cache)),
            Err(err) => {
                warn!(error = %err, "redis unavailable, continuing in durable-only mode");
                None
            }
        }
    } else {
        info!("redis cache disabled, using durable-only mode");
        None
    };

    let cursor = CursorStore::new(Arc::clone(&store) as _, cache);
    let bus = config.stream_enabled.then(|| EventBus::new(config.stream_buffer));
    if bus.is_some() {
        info!(buffer = config.stream_buffer, "live streaming enabled");
    }

    let scanner = Scanner::new(
        pool,
        Arc::clone(&store) as _,
        cursor,
        bus,
        config.scanner_config(),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    scanner.run(shutdown).await?;

    store.close().await;
    info!("indexer stopped");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(config.log_level.clone())
    };

    if config.log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install sigterm handler");
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
