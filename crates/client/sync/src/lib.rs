//! Beacon node initial sync. Brings a node which just joined the network, or fell behind, up to the head
//! of the chain, then hands control to regular block-by-block sync.
//!
//! # Overview
//!
//! Initial sync is a single event loop ([`InitialSync`]) which owns all sync state and processes one input
//! at a time from five sources:
//!
//! - **Polling ticks**: check for convergence, otherwise re-request the missing slot range.
//! - **Block announcements**: raise the highest observed slot and request the new range.
//! - **Block responses** and **batched block responses**: fed one block at a time to the block-processing
//!   transition.
//! - **Crystallized state responses**: matched against the anchor block's state root.
//!
//! A buffer drain task runs next to the loop and asks it to replay buffered blocks once they become
//! contiguous with the cursor. It never mutates state itself.
//!
//! # Sync phases
//!
//! - **Bootstrapping**: no block was committed yet. Only the block at slot `1` is accepted as the anchor,
//!   every other block is buffered.
//! - **Anchoring**: the anchor is committed, and its crystallized state has been requested from the peer
//!   which served the anchor. A matching state moves the cursor straight to its last finalized slot.
//! - **Catching up**: blocks are committed strictly in slot order. Blocks received ahead of the cursor wait
//!   in a bounded in-memory buffer, and blocks at or behind the cursor are discarded.
//! - **Converged**: the cursor reached the highest observed slot. The next polling tick hands control to
//!   [`RegularSync`], exactly once, and the loop exits.
//!
//! The cursor only moves after the block was written to the [`bc_db::BlockStore`]. A failed write leaves the
//! block in the buffer, and it is retried by the drain task or the next polling tick.
//!
//! # Configuration
//!
//! ```
//! use bc_sync::InitialSyncConfig;
//! use std::time::Duration;
//!
//! let config = InitialSyncConfig::default()
//!     .polling_interval(Duration::from_secs(1))
//!     .block_buffer_capacity(256)
//!     .global_stop_on_sync(true);
//! ```
//!
//! # Status reporting
//!
//! Progress is logged periodically as `🔗 Initial sync at current/highest [x blocks/s]`, exported as
//! OpenTelemetry metrics, and can be observed in tests through [`SyncEvent`]s.

mod buffer;
mod config;
mod counter;
mod drain;
mod engine;
mod handoff;
mod metrics;
mod service;
mod state;
mod sync;
#[cfg(test)]
mod tests;
mod util;

pub use config::*;
pub use drain::Progress;
pub use engine::{StateOutcome, SyncEngine, SyncEvent, TickOutcome};
pub use handoff::{HandoffTrigger, RegularSync, SyncStatusQuery};
#[cfg(any(test, feature = "testing"))]
pub use handoff::{MockRegularSync, MockSyncStatusQuery};
pub use service::{InitialSyncService, StopHandle};
pub use state::{Phase, SyncState};
pub use sync::{InitialSync, SyncOutcome};
pub use util::{service_state_channel, ServiceStateSender};
