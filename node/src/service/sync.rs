use bc_db::InMemoryBackend;
use bc_sync::{RegularSync, SyncStatusQuery};
use bp_block::Slot;
use std::sync::Arc;

/// The chain is synced once the local head reached the head served by the devnet peer.
pub struct DevnetSyncStatus {
    backend: Arc<InMemoryBackend>,
    network_head: Slot,
}

impl DevnetSyncStatus {
    pub fn new(backend: Arc<InMemoryBackend>, network_head: Slot) -> Self {
        Self { backend, network_head }
    }
}

#[async_trait::async_trait]
impl SyncStatusQuery for DevnetSyncStatus {
    async fn is_synced(&self) -> anyhow::Result<bool> {
        Ok(self.backend.head_slot().is_some_and(|head| head >= self.network_head))
    }
}

/// Regular block-by-block sync is not part of this node yet, handoff is only logged.
pub struct LoggingRegularSync;

impl RegularSync for LoggingRegularSync {
    fn resume_sync(&self) {
        tracing::info!("🔁 Regular sync resumed");
    }
}
