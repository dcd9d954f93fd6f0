//! Durable storage of finalized beacon blocks and of the canonical crystallized state.

use bp_block::{Block, CrystallizedState, Slot};
use std::{
    borrow::Cow,
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        RwLock,
    },
};

mod error;

pub use error::StorageError;

/// Append-only store of finalized blocks plus a single canonical crystallized state snapshot.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait BlockStore: Send + Sync {
    /// Persists a finalized block. Saving the same block twice is a no-op.
    fn save_block(&self, block: &Block) -> Result<(), StorageError>;

    /// Replaces the canonical crystallized state.
    fn save_crystallized_state(&self, state: &CrystallizedState) -> Result<(), StorageError>;
}

#[derive(Default)]
struct Columns {
    blocks: BTreeMap<Slot, Vec<u8>>,
    crystallized_state: Option<Vec<u8>>,
}

/// [BlockStore] keeping bincode-encoded values in memory, keyed by slot.
#[derive(Default)]
pub struct InMemoryBackend {
    columns: RwLock<Columns>,
    failing_writes: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` writes fail with [StorageError::Unavailable].
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Highest stored slot, if any block was saved.
    pub fn head_slot(&self) -> Option<Slot> {
        self.read().blocks.last_key_value().map(|(slot, _)| *slot)
    }

    pub fn block_at(&self, slot: Slot) -> Result<Option<Block>, StorageError> {
        self.read().blocks.get(&slot).map(|bytes| bincode::deserialize(bytes)).transpose().map_err(Into::into)
    }

    pub fn block_count(&self) -> usize {
        self.read().blocks.len()
    }

    pub fn crystallized_state(&self) -> Result<Option<CrystallizedState>, StorageError> {
        self.read().crystallized_state.as_deref().map(bincode::deserialize).transpose().map_err(Into::into)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Columns> {
        self.columns.read().expect("storage lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Columns> {
        self.columns.write().expect("storage lock poisoned")
    }

    fn check_available(&self) -> Result<(), StorageError> {
        let injected =
            self.failing_writes.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok();
        if injected {
            return Err(StorageError::Unavailable(Cow::Borrowed("injected write failure")));
        }
        Ok(())
    }
}

impl BlockStore for InMemoryBackend {
    #[tracing::instrument(skip(self, block), fields(module = "Db", slot = block.slot))]
    fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        self.check_available()?;
        let bytes = bincode::serialize(block)?;

        let mut columns = self.write();
        if let Some(existing) = columns.blocks.get(&block.slot) {
            if existing != &bytes {
                return Err(StorageError::ConflictingBlock { slot: block.slot });
            }
            return Ok(());
        }
        columns.blocks.insert(block.slot, bytes);
        tracing::trace!("Stored block");
        Ok(())
    }

    #[tracing::instrument(skip(self, state), fields(module = "Db", finalized = state.last_finalized_slot))]
    fn save_crystallized_state(&self, state: &CrystallizedState) -> Result<(), StorageError> {
        self.check_available()?;
        let bytes = bincode::serialize(state)?;
        self.write().crystallized_state = Some(bytes);
        tracing::trace!("Stored crystallized state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use bp_block::Hash32;
    use rstest::{fixture, rstest};

    #[fixture]
    fn backend() -> InMemoryBackend {
        InMemoryBackend::new()
    }

    fn block(slot: Slot) -> Block {
        Block { slot, timestamp: slot * 8, ..Default::default() }
    }

    #[rstest]
    fn stores_blocks_by_slot(backend: InMemoryBackend) {
        assert_eq!(backend.head_slot(), None);
        backend.save_block(&block(2)).unwrap();
        backend.save_block(&block(1)).unwrap();
        assert_eq!(backend.head_slot(), Some(2));
        assert_eq!(backend.block_at(1).unwrap(), Some(block(1)));
        assert_eq!(backend.block_at(3).unwrap(), None);
        assert_eq!(backend.block_count(), 2);
    }

    #[rstest]
    fn same_block_twice_is_noop(backend: InMemoryBackend) {
        backend.save_block(&block(1)).unwrap();
        backend.save_block(&block(1)).unwrap();
        assert_eq!(backend.block_count(), 1);

        let other = Block { parent_hash: Hash32([9; 32]), ..block(1) };
        assert_matches!(backend.save_block(&other), Err(StorageError::ConflictingBlock { slot: 1 }));
    }

    #[rstest]
    fn crystallized_state_is_replaced(backend: InMemoryBackend) {
        assert_eq!(backend.crystallized_state().unwrap(), None);
        let first = CrystallizedState { last_finalized_slot: 3, ..Default::default() };
        let second = CrystallizedState { last_finalized_slot: 5, ..Default::default() };
        backend.save_crystallized_state(&first).unwrap();
        backend.save_crystallized_state(&second).unwrap();
        assert_eq!(backend.crystallized_state().unwrap(), Some(second));
    }

    #[rstest]
    fn injected_failures(backend: InMemoryBackend) {
        backend.fail_next_writes(2);
        assert_matches!(backend.save_block(&block(1)), Err(StorageError::Unavailable(_)));
        assert_matches!(
            backend.save_crystallized_state(&CrystallizedState::default()),
            Err(StorageError::Unavailable(_))
        );
        backend.save_block(&block(1)).unwrap();
        assert_eq!(backend.head_slot(), Some(1));
    }
}
