use autodialer::application::{DialerEngine, DialerSettings, Dispatcher, Repositories};
use autodialer::config::Config;
use autodialer::infrastructure::persistence::MemoryStore;
use autodialer::infrastructure::telephony::provider_from_config;
use autodialer::interface::api::{build_router, init_metrics, AppState};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "postgres")]
use autodialer::infrastructure::persistence::{create_pool, run_migrations, PgStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting autodialer");

    let config = Config::load()?;
    info!("Configuration loaded: {:?}", config);

    let repositories = open_store(&config).await?;

    let provider = provider_from_config(&config.provider)?;

    let engine = Arc::new(DialerEngine::new(
        repositories,
        provider,
        DialerSettings::from_config(&config),
    ));

    // Dispatch loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = Dispatcher::new(
        engine.clone(),
        config.dialer.poll_interval(),
        config.dialer.batch_size,
    );
    let dispatcher_handle = tokio::spawn(dispatcher.run(shutdown_rx));

    // HTTP surface
    let prometheus_handle = init_metrics()?;
    let state = AppState::new(engine, &config.provider.webhook_base_url);
    let app = build_router(state, prometheus_handle);
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    info!("HTTP server listening on {}", config.bind_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down...");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    dispatcher_handle.await?;

    info!("Autodialer stopped");
    Ok(())
}

#[cfg(feature = "postgres")]
async fn open_store(config: &Config) -> anyhow::Result<Repositories> {
    if config.database.url.is_empty() {
        warn!("No database configured, using the in-memory store");
        return Ok(Repositories::from_store(Arc::new(MemoryStore::new())));
    }

    let pool = create_pool(&config.database).await?;
    run_migrations(&pool).await?;
    Ok(Repositories::from_store(Arc::new(PgStore::new(pool))))
}

#[cfg(not(feature = "postgres"))]
async fn open_store(_config: &Config) -> anyhow::Result<Repositories> {
    info!("Built without PostgreSQL support, using the in-memory store");
    Ok(Repositories::from_store(Arc::new(MemoryStore::new())))
}
