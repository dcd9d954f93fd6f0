//! Buffer drain task.
//!
//! Runs next to the event loop and never touches sync state itself: it watches the [Progress] snapshot
//! published by the loop, and when the next block to commit is sitting in the buffer it asks the loop to
//! replay it.

use bp_block::Slot;
use bp_utils::service::ServiceContext;
use tokio::sync::{mpsc, watch};

/// Snapshot of the sync progress, published by the event loop after every input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    pub current_slot: Slot,
    pub highest_observed: Slot,
    /// Whether the block at `current_slot + 1` is buffered.
    pub next_buffered: bool,
}

impl Progress {
    pub fn is_converged(&self) -> bool {
        self.current_slot > 0 && self.current_slot == self.highest_observed
    }
}

/// Sends a replay request each time the snapshot shows the next block waiting in the buffer.
///
/// Returns on convergence, on cancellation, or once the event loop is gone.
pub async fn drain_buffer(mut ctx: ServiceContext, mut progress: watch::Receiver<Progress>, replay: mpsc::Sender<Slot>) {
    loop {
        let snapshot = *progress.borrow_and_update();
        if snapshot.is_converged() {
            tracing::debug!("Buffer drain finished at slot {}", snapshot.current_slot);
            return;
        }

        if snapshot.next_buffered {
            let slot = snapshot.current_slot + 1;
            tracing::trace!("Replaying buffered block {slot}");
            let Some(Ok(())) = ctx.run_until_cancelled(replay.send(slot)).await else { return };
        }

        let Some(Ok(())) = ctx.run_until_cancelled(progress.changed()).await else { return };
    }
}
