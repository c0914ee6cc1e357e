use crate::store::MemoryStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Spawn a background task that persists the store whenever it has changed
pub fn spawn_snapshot_writer(
    store: Arc<MemoryStore>,
    path: PathBuf,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut saved_revision = store.revision();

        loop {
            tokio::time::sleep(interval).await;

            let revision = store.revision();
            if revision == saved_revision {
                continue;
            }

            match store.save_snapshot(&path).await {
                Ok(()) => {
                    tracing::debug!(revision, path = %path.display(), "Snapshot written");
                    saved_revision = revision;
                }
                Err(e) => tracing::warn!("Failed to write snapshot to {}: {}", path.display(), e),
            }
        }
    })
}
