use crate::{util::ServiceStateSender, SyncEvent};
use std::time::Duration;

pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 100;
pub const DEFAULT_BLOCK_BUFFER_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct InitialSyncConfig {
    /// How often to check for convergence and re-request the missing range.
    pub polling_interval: Duration,
    /// How often to log the sync status line.
    pub status_interval: Duration,
    pub block_announce_buffer_size: usize,
    pub block_buffer_size: usize,
    pub batched_block_buffer_size: usize,
    pub crystallized_state_buffer_size: usize,
    /// Maximum number of future blocks held in memory.
    pub block_buffer_capacity: usize,
    /// Call [`bp_utils::service::ServiceContext::cancel_global`] once initial sync hands off to regular sync.
    pub global_stop_on_sync: bool,

    /// For testing purposes, you can subscribe to the engine's progress.
    pub service_state_sender: ServiceStateSender<SyncEvent>,
}

impl InitialSyncConfig {
    pub fn polling_interval(self, polling_interval: Duration) -> Self {
        Self { polling_interval, ..self }
    }
    pub fn status_interval(self, status_interval: Duration) -> Self {
        Self { status_interval, ..self }
    }
    pub fn block_announce_buffer_size(self, block_announce_buffer_size: usize) -> Self {
        Self { block_announce_buffer_size, ..self }
    }
    pub fn block_buffer_size(self, block_buffer_size: usize) -> Self {
        Self { block_buffer_size, ..self }
    }
    pub fn batched_block_buffer_size(self, batched_block_buffer_size: usize) -> Self {
        Self { batched_block_buffer_size, ..self }
    }
    pub fn crystallized_state_buffer_size(self, crystallized_state_buffer_size: usize) -> Self {
        Self { crystallized_state_buffer_size, ..self }
    }
    pub fn block_buffer_capacity(self, block_buffer_capacity: usize) -> Self {
        Self { block_buffer_capacity, ..self }
    }
    pub fn global_stop_on_sync(self, global_stop_on_sync: bool) -> Self {
        Self { global_stop_on_sync, ..self }
    }
    pub fn service_state_sender(self, service_state_sender: ServiceStateSender<SyncEvent>) -> Self {
        Self { service_state_sender, ..self }
    }
}

impl Default for InitialSyncConfig {
    fn default() -> Self {
        Self {
            polling_interval: DEFAULT_POLLING_INTERVAL,
            status_interval: Duration::from_secs(3),
            block_announce_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
            block_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
            batched_block_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
            crystallized_state_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
            block_buffer_capacity: DEFAULT_BLOCK_BUFFER_CAPACITY,
            global_stop_on_sync: false,
            service_state_sender: Default::default(),
        }
    }
}
