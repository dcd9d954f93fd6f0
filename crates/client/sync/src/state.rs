//! Sync progress: the cursor, the highest observed slot and the anchor crystallized state root.

use bp_block::{Hash32, Slot};

/// Whether the crystallized state referenced by the anchor block has been received yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnchorState {
    Awaiting,
    Matched,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cursor {
    /// No anchor block accepted yet.
    Bootstrapping,
    Anchored { anchor_root: Hash32, current_slot: Slot, state: AnchorState },
}

/// Logical phase of the initial sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Bootstrapping,
    /// Anchor accepted, waiting for its crystallized state.
    Anchoring,
    CatchingUp,
    Converged,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncState {
    cursor: Cursor,
    highest_observed: Slot,
}

impl Default for SyncState {
    fn default() -> Self {
        Self { cursor: Cursor::Bootstrapping, highest_observed: 0 }
    }
}

impl SyncState {
    /// Highest slot committed to storage, `0` while bootstrapping.
    pub fn current_slot(&self) -> Slot {
        match self.cursor {
            Cursor::Bootstrapping => 0,
            Cursor::Anchored { current_slot, .. } => current_slot,
        }
    }

    pub fn highest_observed(&self) -> Slot {
        self.highest_observed
    }

    pub fn anchor_root(&self) -> Option<Hash32> {
        match self.cursor {
            Cursor::Bootstrapping => None,
            Cursor::Anchored { anchor_root, .. } => Some(anchor_root),
        }
    }

    /// The root a crystallized state response must hash to, while one is still expected.
    pub fn awaited_state_root(&self) -> Option<Hash32> {
        match self.cursor {
            Cursor::Anchored { anchor_root, state: AnchorState::Awaiting, .. } => Some(anchor_root),
            _ => None,
        }
    }

    /// The only slot which can be committed next.
    pub fn next_slot(&self) -> Slot {
        self.current_slot().saturating_add(1)
    }

    pub fn is_converged(&self) -> bool {
        matches!(self.cursor, Cursor::Anchored { current_slot, .. } if current_slot == self.highest_observed)
    }

    pub fn phase(&self) -> Phase {
        match self.cursor {
            Cursor::Bootstrapping => Phase::Bootstrapping,
            _ if self.is_converged() => Phase::Converged,
            Cursor::Anchored { state: AnchorState::Awaiting, .. } => Phase::Anchoring,
            Cursor::Anchored { state: AnchorState::Matched, .. } => Phase::CatchingUp,
        }
    }

    /// Raises the highest observed slot. Returns true if it changed.
    pub fn observe(&mut self, slot: Slot) -> bool {
        if slot > self.highest_observed {
            self.highest_observed = slot;
            true
        } else {
            false
        }
    }

    /// Accepts the anchor block. No-op if already anchored.
    pub fn anchor(&mut self, anchor_root: Hash32, slot: Slot) {
        if self.cursor == Cursor::Bootstrapping {
            self.cursor = Cursor::Anchored { anchor_root, current_slot: slot, state: AnchorState::Awaiting };
            self.observe(slot);
        }
    }

    /// Moves the cursor to `slot`, which must be [SyncState::next_slot].
    pub fn commit(&mut self, slot: Slot) {
        if let Cursor::Anchored { current_slot, .. } = &mut self.cursor {
            debug_assert_eq!(slot, *current_slot + 1, "Non-sequential commit");
            if slot == *current_slot + 1 {
                *current_slot = slot;
            }
        }
        self.observe(slot);
    }

    /// Jumps the cursor forward to the last finalized slot of the matched anchor state.
    pub fn adopt_finalized(&mut self, finalized_slot: Slot) {
        if let Cursor::Anchored { current_slot, state, .. } = &mut self.cursor {
            *state = AnchorState::Matched;
            if finalized_slot > *current_slot {
                *current_slot = finalized_slot;
            }
        }
        self.observe(finalized_slot);
    }
}
