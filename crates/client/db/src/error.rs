use bp_block::Slot;
use std::borrow::Cow;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("Storage is unavailable: {0}")]
    Unavailable(Cow<'static, str>),
    #[error("Inconsistent storage: {0}")]
    InconsistentStorage(Cow<'static, str>),
    #[error("Block at slot {slot} conflicts with the stored block")]
    ConflictingBlock { slot: Slot },
}
