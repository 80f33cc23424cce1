use anyhow::Context;
use buildd_manager::clock::{Clock, SystemClock};
use buildd_manager::factory::{BuilderFactory, PrefetchedBuilderFactory};
use buildd_manager::repository::{PgStore, Repositories};
use buildd_manager::worker::HttpWorkerFactory;
use buildd_manager::{BuilddManager, Config, api, db};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "buildd_manager=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting buildd manager...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    tracing::info!("Connecting to database...");

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let repos = Repositories::from_store(Arc::new(PgStore::new(pool)));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let factory: Arc<dyn BuilderFactory> =
        Arc::new(PrefetchedBuilderFactory::new(repos.builders.clone(), clock.clone()));
    let workers = Arc::new(
        HttpWorkerFactory::new(config.socket_timeout, config.vm_resume_command.clone())
            .context("Failed to create worker HTTP client")?,
    );

    let manager = BuilddManager::new(
        factory,
        workers,
        repos.clone(),
        clock,
        config.manager_settings(),
    );
    manager.start().await;

    let app = api::create_router(repos);
    tracing::info!("Status API listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    let shutdown = manager.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    let server_shutdown = manager.shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await
        .context("Status API server failed")?;

    manager.stop().await;
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
