use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Background task that periodically drops expired slot claims. Claims are
/// normally released by their holder; the sweep only matters when a task
/// died mid-commit and nobody contends for its slot afterwards.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        let swept = engine.locks.sweep_expired(Instant::now());
        if swept > 0 {
            debug!("reaped {swept} expired slot claims");
        }
    }
}

/// Background task that rewrites the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        info!("compacting WAL after {appends} appends");
        match engine.compact_wal().await {
            Ok(()) => info!("WAL compaction complete"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
