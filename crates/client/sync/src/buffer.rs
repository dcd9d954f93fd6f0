//! Bounded in-memory buffer of blocks received ahead of the cursor.

use bp_block::{Block, Slot};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Insertion {
    Inserted,
    /// The buffer was full, the block at this slot was dropped to make room.
    InsertedEvicting(Slot),
    /// A block is already buffered at this slot. The buffered one is kept.
    Duplicate,
    /// The slot is at or behind the cursor.
    Stale,
    /// The buffer is full and every buffered block is closer to the cursor.
    Rejected,
}

pub struct BlockBuffer {
    blocks: BTreeMap<Slot, Block>,
    capacity: usize,
}

impl BlockBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { blocks: BTreeMap::new(), capacity: capacity.max(1) }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn contains(&self, slot: Slot) -> bool {
        self.blocks.contains_key(&slot)
    }

    pub fn take(&mut self, slot: Slot) -> Option<Block> {
        self.blocks.remove(&slot)
    }

    /// Buffers `block` unless a block is already held at its slot.
    ///
    /// When full, blocks the cursor has moved past go first, then the block farthest from the cursor.
    pub fn insert(&mut self, block: Block, current_slot: Slot) -> Insertion {
        let slot = block.slot;
        if slot <= current_slot {
            return Insertion::Stale;
        }
        if self.blocks.contains_key(&slot) {
            return Insertion::Duplicate;
        }

        let mut evicted = None;
        if self.blocks.len() >= self.capacity {
            self.prune_through(current_slot);
        }
        if self.blocks.len() >= self.capacity {
            let Some((&farthest, _)) = self.blocks.last_key_value() else { return Insertion::Rejected };
            if farthest < slot {
                return Insertion::Rejected;
            }
            self.blocks.remove(&farthest);
            evicted = Some(farthest);
        }

        self.blocks.insert(slot, block);
        match evicted {
            Some(farthest) => Insertion::InsertedEvicting(farthest),
            None => Insertion::Inserted,
        }
    }

    /// Drops every block at or below `slot`. Returns how many were dropped.
    pub fn prune_through(&mut self, slot: Slot) -> usize {
        let kept = self.blocks.split_off(&(slot.saturating_add(1)));
        let pruned = std::mem::replace(&mut self.blocks, kept);
        pruned.len()
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Buffered slots, in ascending order.
    pub fn slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.blocks.keys().copied()
    }
}
