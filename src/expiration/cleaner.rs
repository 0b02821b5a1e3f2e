use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::storage::RedbEngine;

/// Start the background task that purges expired keys from the embedded
/// engine. Redis expires keys itself and needs no such task.
pub fn start_expiration_cleaner(engine: RedbEngine, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);

        loop {
            interval_timer.tick().await;
            run_cleanup(&engine).await;
        }
    })
}

/// One purge pass. Returns the number of keys removed, zero on failure.
pub async fn run_cleanup(engine: &RedbEngine) -> usize {
    debug!("Running expiration cleanup");

    let engine = engine.clone();
    match tokio::task::spawn_blocking(move || engine.purge_expired()).await {
        Ok(Ok(count)) => {
            if count > 0 {
                debug!(keys_purged = count, "Expired keys purged");
            }
            count
        }
        Ok(Err(e)) => {
            error!(error = %e, "Failed to purge expired keys");
            0
        }
        Err(e) => {
            error!(error = %e, "Expiration cleanup task panicked");
            0
        }
    }
}
