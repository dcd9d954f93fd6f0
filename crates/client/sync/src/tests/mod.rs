mod event_loop;

use crate::{service_state_channel, InitialSyncConfig, SyncEngine, SyncEvent};
use bc_db::InMemoryBackend;
use bc_p2p::{LocalNetwork, Outbound, Request};
use bp_block::{Block, CrystallizedState, Hash32, Slot};
use rstest::fixture;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

pub fn anchor_state(last_finalized_slot: Slot) -> CrystallizedState {
    CrystallizedState {
        last_state_recalc: last_finalized_slot,
        last_justified_slot: last_finalized_slot,
        justified_streak: 1,
        last_finalized_slot,
        current_dynasty: 1,
        dynasty_seed: Hash32([3; 32]),
        dynasty_start: 0,
    }
}

/// Blocks `1..=len`, all committing to `state`.
pub fn make_chain(len: Slot, state: &CrystallizedState) -> Vec<Block> {
    let root = state.hash().unwrap();
    let mut parent_hash = Hash32::ZERO;
    (1..=len)
        .map(|slot| {
            let block = Block {
                slot,
                parent_hash,
                crystallized_state_root: root,
                active_state_root: Hash32::keccak256(&slot.to_be_bytes()),
                timestamp: 1_700_000_000 + slot * 8,
            };
            parent_hash = block.hash().unwrap();
            block
        })
        .collect()
}

pub struct EngineCtx {
    pub network: LocalNetwork,
    pub backend: Arc<InMemoryBackend>,
    pub engine: SyncEngine,
    pub events: UnboundedReceiver<SyncEvent>,
}

impl EngineCtx {
    pub fn new(config: InitialSyncConfig) -> Self {
        let network = LocalNetwork::new();
        let backend = Arc::new(InMemoryBackend::new());
        let (sender, events) = service_state_channel();
        let engine =
            SyncEngine::new(Arc::new(network.clone()), backend.clone(), &config.service_state_sender(sender));
        Self { network, backend, engine, events }
    }

    pub fn current_slot(&self) -> Slot {
        self.engine.state().current_slot()
    }

    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        let mut events = vec![];
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Requests sent since the last call.
    pub fn take_requests(&self) -> Vec<Outbound> {
        let requests = self.network.requests();
        self.network.clear_requests();
        requests
    }

    /// Slots of the block-by-slot requests sent since the last call.
    pub fn take_block_requests(&self) -> Vec<Slot> {
        self.take_requests()
            .into_iter()
            .filter_map(|out| match out.request() {
                Request::BlockBySlot { slot } => Some(*slot),
                _ => None,
            })
            .collect()
    }
}

#[fixture]
pub fn ctx() -> EngineCtx {
    EngineCtx::new(InitialSyncConfig::default())
}
