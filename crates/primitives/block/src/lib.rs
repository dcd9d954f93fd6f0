//! Beacon chain primitives: blocks, crystallized states and the hashes which identify them.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Slot number of a beacon block.
pub type Slot = u64;

#[derive(thiserror::Error, Debug)]
pub enum BlockError {
    #[error("Failed to encode {what} for hashing: {source}")]
    Encoding {
        what: &'static str,
        #[source]
        source: bincode::Error,
    },
}

/// A 32-byte keccak256 digest.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }

    pub fn keccak256(bytes: &[u8]) -> Self {
        Self(Keccak256::digest(bytes).into())
    }
}

impl From<[u8; 32]> for Hash32 {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

fn content_hash<T: Serialize>(what: &'static str, value: &T) -> Result<Hash32, BlockError> {
    let bytes = bincode::serialize(value).map_err(|source| BlockError::Encoding { what, source })?;
    Ok(Hash32::keccak256(&bytes))
}

/// A beacon chain block, immutable once received.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub slot: Slot,
    pub parent_hash: Hash32,
    /// Root of the crystallized state this block commits to.
    pub crystallized_state_root: Hash32,
    pub active_state_root: Hash32,
    /// Unix timestamp, in seconds.
    pub timestamp: u64,
}

impl Block {
    /// Keccak256 of the block's canonical encoding.
    pub fn hash(&self) -> Result<Hash32, BlockError> {
        content_hash("block", self)
    }
}

/// Checkpoint of the beacon chain state, recomputed once per cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrystallizedState {
    pub last_state_recalc: Slot,
    pub last_justified_slot: Slot,
    pub justified_streak: u64,
    /// Every block up to and including this slot is final.
    pub last_finalized_slot: Slot,
    pub current_dynasty: u64,
    pub dynasty_seed: Hash32,
    pub dynasty_start: Slot,
}

impl CrystallizedState {
    /// Keccak256 of the state's canonical encoding. Blocks reference a state by this hash.
    pub fn hash(&self) -> Result<Hash32, BlockError> {
        content_hash("crystallized state", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn zero_hash() {
        assert!(Hash32::ZERO.is_zero());
        assert!(!Hash32::keccak256(b"").is_zero());
        assert_eq!(
            Hash32::keccak256(b"").to_string(),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn block_hash_is_stable() {
        let block = Block { slot: 3, timestamp: 12, ..Default::default() };
        assert_eq!(block.hash().unwrap(), block.clone().hash().unwrap());
    }

    #[rstest]
    #[case::slot(Block { slot: 1, ..Default::default() })]
    #[case::parent(Block { parent_hash: Hash32([1; 32]), ..Default::default() })]
    #[case::state_root(Block { crystallized_state_root: Hash32([2; 32]), ..Default::default() })]
    #[case::timestamp(Block { timestamp: 1, ..Default::default() })]
    fn block_hash_covers_every_field(#[case] block: Block) {
        assert_ne!(block.hash().unwrap(), Block::default().hash().unwrap());
    }

    #[test]
    fn state_hash_depends_on_finalized_slot() {
        let a = CrystallizedState { last_finalized_slot: 3, ..Default::default() };
        let b = CrystallizedState { last_finalized_slot: 4, ..Default::default() };
        assert_ne!(a.hash().unwrap(), b.hash().unwrap());
    }
}
