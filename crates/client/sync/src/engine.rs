//! State transitions of the initial sync.
//!
//! [SyncEngine] is fully synchronous: every transition runs to completion before the event loop picks
//! the next input, so the cursor and the block buffer are only ever touched from one place.

use crate::{
    buffer::{BlockBuffer, Insertion},
    drain::Progress,
    metrics::SyncMetrics,
    state::SyncState,
    util::{fmt_option, ServiceStateSender},
    InitialSyncConfig,
};
use bc_db::BlockStore;
use bc_p2p::{P2pApi, PeerId, Request};
use bp_block::{Block, CrystallizedState, Hash32, Slot};
use std::sync::Arc;

/// Observable milestones of the initial sync.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SyncEvent {
    Anchored { slot: Slot, anchor_root: Hash32 },
    StateMatched { finalized_slot: Slot },
    Committed { slot: Slot },
    Converged { slot: Slot },
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TickOutcome {
    /// Nothing to do before an anchor is accepted.
    Idle,
    Requested,
    Converged,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum StateOutcome {
    /// No crystallized state is expected.
    Ignored,
    Malformed,
    Mismatch,
    PersistFailed,
    /// Persisted, but the cursor is already at or past its finalized slot.
    Stale,
    Matched,
}

pub struct SyncEngine {
    state: SyncState,
    buffer: BlockBuffer,
    p2p: Arc<dyn P2pApi>,
    store: Arc<dyn BlockStore>,
    metrics: SyncMetrics,
    events: ServiceStateSender<SyncEvent>,
}

impl SyncEngine {
    pub fn new(p2p: Arc<dyn P2pApi>, store: Arc<dyn BlockStore>, config: &InitialSyncConfig) -> Self {
        Self {
            state: SyncState::default(),
            buffer: BlockBuffer::new(config.block_buffer_capacity),
            p2p,
            store,
            metrics: SyncMetrics::register(),
            events: config.service_state_sender.clone(),
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn buffered_slots(&self) -> Vec<Slot> {
        self.buffer.slots().collect()
    }

    pub fn progress(&self) -> Progress {
        Progress {
            current_slot: self.state.current_slot(),
            highest_observed: self.state.highest_observed(),
            next_buffered: self.buffer.contains(self.state.next_slot()),
        }
    }

    pub(crate) fn send_event(&self, event: SyncEvent) {
        self.events.send(event);
    }

    /// Periodic check. A block left in the buffer at the next slot by a failed write is retried first.
    pub fn on_tick(&mut self) -> TickOutcome {
        let next = self.state.next_slot();
        if self.buffer.contains(next) {
            tracing::debug!("Retrying buffered block {next}");
            self.on_replay(next);
        }

        if self.state.current_slot() == 0 {
            return TickOutcome::Idle;
        }
        if self.state.is_converged() {
            return TickOutcome::Converged;
        }
        self.request_missing_range();
        TickOutcome::Requested
    }

    pub fn on_block_announce(&mut self, slot: Slot) {
        if self.state.observe(slot) {
            tracing::trace!("New highest observed slot {slot}");
        }
        self.request_missing_range();
        self.record_metrics();
    }

    pub fn on_block(&mut self, block: Block, peer: Option<PeerId>) {
        let mut next = self.process_block(block, peer);
        while let Some(slot) = next {
            next = self.dispatch(slot);
        }
        self.record_metrics();
    }

    /// Blocks are processed one by one, in the order they were received.
    pub fn on_batched_blocks(&mut self, blocks: Vec<Block>, peer: Option<PeerId>) {
        for block in blocks {
            self.on_block(block, peer);
        }
    }

    /// Feeds the buffered block at `slot` back into the pipeline, if it is the next one to commit.
    pub fn on_replay(&mut self, slot: Slot) {
        if slot != self.state.next_slot() {
            tracing::trace!("Ignoring stale replay of slot {slot}");
            return;
        }
        let Some(block) = self.buffer.take(slot) else { return };
        self.on_block(block, None);
    }

    pub fn on_crystallized_state(&mut self, state: CrystallizedState) -> StateOutcome {
        let Some(expected) = self.state.awaited_state_root() else {
            return StateOutcome::Ignored;
        };

        let hash = match state.hash() {
            Ok(hash) => hash,
            Err(err) => {
                tracing::warn!("Unable to hash crystallized state: {err:#}");
                return StateOutcome::Malformed;
            }
        };
        if hash != expected {
            tracing::trace!("Discarding crystallized state {hash}, expected {expected}");
            return StateOutcome::Mismatch;
        }
        if state.last_finalized_slot == Slot::MAX {
            tracing::warn!("Discarding crystallized state {hash} finalized at the last possible slot");
            return StateOutcome::Malformed;
        }

        if let Err(err) = self.store.save_crystallized_state(&state) {
            tracing::error!("Unable to save crystallized state for initial sync: {err:#}");
            return StateOutcome::PersistFailed;
        }
        tracing::debug!("Saved crystallized state {hash} to the db");

        let finalized_slot = state.last_finalized_slot;
        if finalized_slot <= self.state.current_slot() {
            tracing::debug!("Crystallized state finalized slot {finalized_slot} is behind the cursor");
            return StateOutcome::Stale;
        }

        self.state.adopt_finalized(finalized_slot);
        self.buffer.prune_through(finalized_slot);
        tracing::info!("📥 Matched anchor crystallized state, syncing from finalized slot {finalized_slot}");
        self.events.send(SyncEvent::StateMatched { finalized_slot });

        let mut next = Some(self.state.next_slot());
        while let Some(slot) = next {
            next = self.dispatch(slot);
        }
        self.record_metrics();
        StateOutcome::Matched
    }

    /// Drops every buffered block. Called once the sync is over.
    pub fn finish(&mut self) {
        tracing::debug!("Initial sync committed {} blocks", self.metrics.counter.total());
        self.buffer.clear();
        self.record_metrics();
    }

    pub fn show_status(&self) {
        let throughput_sec = self.metrics.counter.get_throughput();
        let current = Some(self.state.current_slot()).filter(|slot| *slot > 0);
        let highest = Some(self.state.highest_observed()).filter(|slot| *slot > 0);

        tracing::info!(
            "🔗 Initial sync at {}/{} [{throughput_sec:.2} blocks/s]",
            fmt_option(current, "N"),
            fmt_option(highest, "?")
        );
    }

    /// Block-processing transition. Returns the slot to request next, if any.
    fn process_block(&mut self, block: Block, peer: Option<PeerId>) -> Option<Slot> {
        let slot = block.slot;
        self.state.observe(slot);

        let current_slot = self.state.current_slot();
        if current_slot == 0 {
            if slot != 1 {
                self.buffer_block(block);
                return Some(1);
            }
            return self.accept_anchor(block, peer);
        }

        if slot <= current_slot {
            tracing::trace!("Discarding stale block {slot}");
            return None;
        }
        if slot != current_slot + 1 {
            self.buffer_block(block);
            return None;
        }
        self.commit_next(block)
    }

    /// Next-slot dispatch: a buffered block is processed directly instead of being requested.
    fn dispatch(&mut self, slot: Slot) -> Option<Slot> {
        if let Some(block) = self.buffer.take(slot) {
            tracing::trace!("Block {slot} found in memory");
            return self.process_block(block, None);
        }
        tracing::debug!("Requesting block {slot}");
        self.p2p.broadcast(Request::BlockBySlot { slot });
        None
    }

    fn accept_anchor(&mut self, block: Block, peer: Option<PeerId>) -> Option<Slot> {
        let hash = match block.hash() {
            Ok(hash) => hash,
            Err(err) => {
                tracing::warn!("Discarding anchor block: {err:#}");
                return None;
            }
        };
        if let Err(err) = self.store.save_block(&block) {
            tracing::error!("Could not set block {hash} for initial sync: {err:#}");
            self.buffer_block(block);
            return None;
        }

        let anchor_root = block.crystallized_state_root;
        self.state.anchor(anchor_root, block.slot);
        self.metrics.block_committed();
        tracing::info!("⚓ Saved block {hash} at slot {} as initial sync anchor", block.slot);
        self.events.send(SyncEvent::Anchored { slot: block.slot, anchor_root });

        tracing::debug!("Requesting crystallized state {anchor_root}");
        let request = Request::CrystallizedState { hash: anchor_root };
        match peer {
            Some(peer) => self.p2p.send(request, peer),
            None => self.p2p.broadcast(request),
        }

        Some(self.state.next_slot())
    }

    fn commit_next(&mut self, block: Block) -> Option<Slot> {
        let hash = match block.hash() {
            Ok(hash) => hash,
            Err(err) => {
                tracing::warn!("Discarding block {}: {err:#}", block.slot);
                return None;
            }
        };
        if let Err(err) = self.store.save_block(&block) {
            tracing::error!("Unable to save block {hash} at slot {}: {err:#}", block.slot);
            self.buffer_block(block);
            return None;
        }

        let slot = block.slot;
        self.state.commit(slot);
        self.buffer.take(slot);
        self.metrics.block_committed();
        tracing::debug!("Saved block {hash} at slot {slot} for initial sync");
        self.events.send(SyncEvent::Committed { slot });

        Some(self.state.next_slot())
    }

    fn buffer_block(&mut self, block: Block) {
        let slot = block.slot;
        match self.buffer.insert(block, self.state.current_slot()) {
            Insertion::Inserted => tracing::trace!("Buffered block {slot}"),
            Insertion::InsertedEvicting(evicted) => {
                tracing::debug!("Block buffer full, dropped block {evicted} to buffer block {slot}")
            }
            Insertion::Duplicate => tracing::trace!("Block {slot} already buffered"),
            Insertion::Stale => tracing::trace!("Discarding stale block {slot}"),
            Insertion::Rejected => tracing::debug!("Block buffer full, dropping block {slot}"),
        }
    }

    fn request_missing_range(&self) {
        let start_slot = self.state.next_slot();
        let end_slot = self.state.highest_observed();
        if start_slot > end_slot {
            return;
        }
        tracing::debug!("Requesting batched blocks from slot {start_slot} to {end_slot}");
        self.p2p.broadcast(Request::BatchedBlocks { start_slot, end_slot });
    }

    fn record_metrics(&self) {
        self.metrics.update(self.state.current_slot(), self.state.highest_observed(), self.buffer.len());
    }
}
