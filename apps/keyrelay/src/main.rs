use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use keyrelay_common::ShutdownToken;
use keyrelay_core::router as gateway_router;
use keyrelay_storage::{SeaOrmStorage, Storage};

mod cli;
mod logging;
mod metrics;
mod stats;

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cli = Cli::parse();
    let config = Arc::new(keyrelay_config::load_config(&cli.config).context("loading configuration")?);

    let storage: Arc<dyn Storage> = Arc::new(
        SeaOrmStorage::connect(&config.database.dsn()).await.context("connecting to database")?,
    );
    storage.wait_for_schema_ready(Duration::from_secs(30)).await.context("waiting for database schema")?;

    let clients = Arc::new(keyrelay_provider_core::client::ClientFactory::new());
    let stats_writer = Arc::new(stats::JsonlStatsWriter::new(&config.logging));
    let stats_sink: Arc<dyn keyrelay_core::StatsSink> = stats_writer.clone();

    let state = keyrelay_core::build_app_state(&config, storage.clone(), clients.clone(), Some(stats_sink))
        .await
        .context("building gateway state")?;

    let shutdown = ShutdownToken::new();

    let mut tasks = Vec::new();
    tasks.push(keyrelay_core::spawn_pool_refresh_loop(state.clone(), shutdown.clone()));
    tasks.push(keyrelay_probe::spawn_probe_loop(config.clone(), storage.clone(), clients.clone(), shutdown.clone()));
    tasks.push(keyrelay_probe::spawn_credential_syncer(config.clone(), storage.clone(), shutdown.clone()));
    tasks.push(keyrelay_probe::spawn_proxy_syncer(config.clone(), storage.clone(), shutdown.clone()));
    tasks.push(keyrelay_probe::spawn_vacuum_loop(storage.clone(), shutdown.clone()));
    tasks.push(stats::spawn_stats_flush_loop(stats_writer, config.logging.clone(), shutdown.clone()));

    let metrics_cache = Arc::new(metrics::MetricsCache::new());
    tasks.push(metrics::spawn_refresh_loop(metrics_cache.clone(), storage.clone(), shutdown.clone()));

    let app = gateway_router(state).merge(metrics::router(metrics_cache, config.metrics.clone()));

    let bind = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind).await.with_context(|| format!("binding {bind}"))?;
    tracing::info!(address = %bind, "keyrelay listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(wait_for_shutdown_signal(shutdown.clone()))
        .await
        .context("serving gateway")?;

    for task in tasks {
        task.abort();
    }

    Ok(())
}

async fn wait_for_shutdown_signal(shutdown: ShutdownToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
    shutdown.shutdown();
}
