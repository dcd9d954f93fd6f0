//! Startup query and the one-shot handoff to regular sync.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Network-wide sync status, consulted once when initial sync starts.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait::async_trait]
pub trait SyncStatusQuery: Send + Sync {
    async fn is_synced(&self) -> anyhow::Result<bool>;
}

/// Steady-state, block-by-block sync which takes over once initial sync converges.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait RegularSync: Send + Sync {
    fn resume_sync(&self);
}

/// Hands control to [RegularSync] at most once, however many times it is fired.
pub struct HandoffTrigger {
    fired: AtomicBool,
    regular_sync: Arc<dyn RegularSync>,
}

impl HandoffTrigger {
    pub fn new(regular_sync: Arc<dyn RegularSync>) -> Self {
        Self { fired: AtomicBool::new(false), regular_sync }
    }

    /// Returns false if the handoff already happened.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        tracing::info!("🏁 Exiting initial sync and starting regular sync");
        self.regular_sync.resume_sync();
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}
