use bp_block::{Block, CrystallizedState, Hash32, Slot};
use std::fmt;

/// Identity of a remote peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Inbound message streams a node can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    /// A peer announces it has a block at some slot.
    BlockAnnounce,
    /// A single block, in response to [Request::BlockBySlot].
    BlockResponse,
    /// A range of blocks, in response to [Request::BatchedBlocks].
    BatchedBlockResponse,
    /// A crystallized state, in response to [Request::CrystallizedState].
    CrystallizedStateResponse,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlockAnnounce => write!(f, "block_announce"),
            Self::BlockResponse => write!(f, "block_response"),
            Self::BatchedBlockResponse => write!(f, "batched_block_response"),
            Self::CrystallizedStateResponse => write!(f, "crystallized_state_response"),
        }
    }
}

/// Outbound requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    BlockBySlot { slot: Slot },
    /// Both bounds are inclusive.
    BatchedBlocks { start_slot: Slot, end_slot: Slot },
    CrystallizedState { hash: Hash32 },
}

/// Message contents. Each [Topic] is expected to carry one kind of payload, anything else is malformed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    BlockAnnounce { slot: Slot },
    Block(Block),
    BatchedBlocks { start_slot: Slot, end_slot: Slot, blocks: Vec<Block> },
    CrystallizedState(CrystallizedState),
}

impl Payload {
    /// The topic this payload is normally published on.
    pub fn topic(&self) -> Topic {
        match self {
            Self::BlockAnnounce { .. } => Topic::BlockAnnounce,
            Self::Block(_) => Topic::BlockResponse,
            Self::BatchedBlocks { .. } => Topic::BatchedBlockResponse,
            Self::CrystallizedState(_) => Topic::CrystallizedStateResponse,
        }
    }
}

/// A received message and the peer it came from, if known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub peer: Option<PeerId>,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(peer: Option<PeerId>, payload: Payload) -> Self {
        Self { peer, payload }
    }
}
