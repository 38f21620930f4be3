use std::sync::Arc;

use tracing::info;

use rentabike::config::Config;
use rentabike::engine::Engine;
use rentabike::store::Datastore;
use rentabike::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env();
    rentabike::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = config.wal_path();
    let store = Arc::new(Datastore::open(&wal_path)?);
    let engine = Arc::new(Engine::new(store.clone()));

    info!("rentabike engine started");
    info!("  wal: {}", wal_path.display());
    info!("  sweep_interval: {:?}", config.sweep_interval);
    info!("  compact_threshold: {}", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    engine.reconcile_statuses().await?;

    let sweeper = tokio::spawn(sweeper::run_sweeper(engine.clone(), config.sweep_interval));
    let compactor = tokio::spawn(sweeper::run_compactor(store.clone(), config.compact_threshold));

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    shutdown.await;
    info!("shutdown signal received");

    sweeper.abort();
    compactor.abort();
    // Writes are already durable; this only shortens the next replay.
    match store.compact().await {
        Ok(events) => info!("final compaction wrote {events} events"),
        Err(e) => tracing::warn!("final compaction failed: {e}"),
    }

    info!("rentabike stopped");
    Ok(())
}
