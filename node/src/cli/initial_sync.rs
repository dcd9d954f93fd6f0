use bc_sync::{InitialSyncConfig, DEFAULT_BLOCK_BUFFER_CAPACITY, DEFAULT_STREAM_BUFFER_SIZE};
use bp_utils::{
    parsers::parse_duration,
    serde::{deserialize_duration, serialize_duration},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, clap::Args, Deserialize, Serialize)]
pub struct InitialSyncParams {
    /// Disable the initial sync service. The node then only serves the local network.
    #[clap(env = "BEACON_INITIAL_SYNC_DISABLED", long, alias = "no-initial-sync")]
    pub initial_sync_disabled: bool,

    /// How often initial sync checks whether it caught up, and re-requests the missing block range
    /// otherwise.
    #[clap(env = "BEACON_SYNC_POLLING_INTERVAL", long, default_value = "2s", value_parser = parse_duration)]
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub sync_polling_interval: Duration,

    /// How often the sync progress is logged.
    #[clap(env = "BEACON_SYNC_STATUS_INTERVAL", long, default_value = "3s", value_parser = parse_duration)]
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub sync_status_interval: Duration,

    /// Queue size of each inbound message subscription. Messages arriving on a full queue are dropped.
    #[clap(env = "BEACON_SYNC_STREAM_BUFFER", long, value_name = "MESSAGES", default_value_t = DEFAULT_STREAM_BUFFER_SIZE)]
    pub sync_stream_buffer_size: usize,

    /// Maximum number of blocks kept in memory while waiting for the blocks before them.
    #[clap(env = "BEACON_SYNC_BLOCK_BUFFER", long, value_name = "BLOCKS", default_value_t = DEFAULT_BLOCK_BUFFER_CAPACITY)]
    pub sync_block_buffer_capacity: usize,

    /// Gracefully shutdown the node once initial sync has handed off to regular sync.
    #[clap(env = "BEACON_STOP_ON_SYNC", long)]
    pub stop_on_sync: bool,
}

impl InitialSyncParams {
    pub fn as_initial_sync_config(&self) -> InitialSyncConfig {
        InitialSyncConfig::default()
            .polling_interval(self.sync_polling_interval)
            .status_interval(self.sync_status_interval)
            .block_announce_buffer_size(self.sync_stream_buffer_size)
            .block_buffer_size(self.sync_stream_buffer_size)
            .batched_block_buffer_size(self.sync_stream_buffer_size)
            .crystallized_state_buffer_size(self.sync_stream_buffer_size)
            .block_buffer_capacity(self.sync_block_buffer_capacity)
            .global_stop_on_sync(self.stop_on_sync)
    }
}
