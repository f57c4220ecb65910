use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::database::Repository;

const RATE_SWEEP_INTERVAL: Duration = Duration::from_secs(600);
const RETENTION_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Periodic cleanup: stale rate-counter rows every ten minutes, query logs
/// past each bot's retention window every hour.
pub fn spawn_maintenance(repository: Arc<Repository>) {
    let rate_repo = repository.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RATE_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            match rate_repo.sweep_rate_counters().await {
                Ok(0) => {}
                Ok(n) => info!(rows = n, "swept stale rate counters"),
                Err(e) => warn!("rate counter sweep failed: {}", e),
            }
        }
    });

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETENTION_PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            match repository.purge_expired_query_logs().await {
                Ok(0) => {}
                Ok(n) => info!(rows = n, "purged expired query logs"),
                Err(e) => warn!("query log purge failed: {}", e),
            }
        }
    });
}
