use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that periodically deletes expired lock rows. Storage
/// hygiene only: every capacity computation already filters on
/// `expires_at > now`, so correctness never depends on this sweep.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let expired = engine.collect_expired_locks(now);
        for (lock_id, _slot_id) in expired {
            match engine.release_lock(lock_id).await {
                Ok(true) => info!("reaped expired lock {lock_id}"),
                // Already released or consumed in the meantime
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!("reaper skip {lock_id}: {e}");
                }
            }
        }
    }
}

/// Background task that compacts the journal once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.journal_appends_since_compact().await;
        if appends >= threshold {
            match engine.compact_journal().await {
                Ok(()) => info!("compacted journal after {appends} appends"),
                Err(e) => tracing::warn!("journal compaction failed: {e}"),
            }
        }
    }
}
