use std::sync::Arc;
use std::time::Duration;

use keyrelay_common::ShutdownToken;
use keyrelay_storage::Storage;
use tokio::task::JoinHandle;

const VACUUM_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Spawns the weekly `VACUUM` maintenance loop (§5 item iii). A daily
/// amnesty sweep is intentionally not spawned here: the per-update gate in
/// the health probe (§4.9) is the only amnesty mechanism this crate
/// implements.
pub fn spawn_vacuum_loop(storage: Arc<dyn Storage>, shutdown: ShutdownToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = tokio::time::sleep(VACUUM_INTERVAL) => {
                    tracing::info!("running scheduled VACUUM");
                    if let Err(err) = storage.vacuum().await {
                        tracing::warn!(error = %err, "scheduled VACUUM failed");
                    }
                }
            }
        }
    })
}
