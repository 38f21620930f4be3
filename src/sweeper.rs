use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::store::Datastore;

/// Background task that re-derives every bike's cached status.
/// Reservations begin and end with the clock, not only on writes.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_once(&engine).await;
    }
}

pub async fn sweep_once(engine: &Engine) -> Option<usize> {
    match engine.refresh_all_statuses(chrono::Utc::now()).await {
        Ok(changed) => {
            metrics::counter!(crate::observability::SWEEPS_TOTAL, "status" => "ok").increment(1);
            if changed > 0 {
                info!("sweeper refreshed {changed} bike statuses");
            }
            Some(changed)
        }
        Err(e) => {
            metrics::counter!(crate::observability::SWEEPS_TOTAL, "status" => "error").increment(1);
            warn!("sweeper failed: {e}");
            None
        }
    }
}

/// Background task that compacts the WAL once it has grown past `threshold`
/// appends since the last compaction.
pub async fn run_compactor(store: Arc<Datastore>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
    }
}

pub async fn compact_if_needed(store: &Datastore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        debug!("compactor skip: {appends} appends < {threshold}");
        return false;
    }
    match store.compact().await {
        Ok(events) => {
            info!("compacted WAL: {appends} appends -> {events} events");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}
