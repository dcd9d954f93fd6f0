use bp_block::Slot;
use bp_utils::{
    parsers::parse_duration,
    serde::{deserialize_duration, serialize_duration},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters of the simulated local network.
#[derive(Clone, Debug, clap::Args, Deserialize, Serialize)]
pub struct DevnetParams {
    /// Number of blocks in the generated chain.
    #[clap(env = "BEACON_DEVNET_CHAIN_LENGTH", long, value_name = "BLOCKS", default_value_t = 256)]
    pub devnet_chain_length: Slot,

    /// Last finalized slot of the crystallized state referenced by the generated blocks.
    #[clap(env = "BEACON_DEVNET_FINALIZED_SLOT", long, value_name = "SLOT", default_value_t = 64)]
    pub devnet_finalized_slot: Slot,

    /// Seed used to generate the chain and to shuffle responses.
    #[clap(env = "BEACON_DEVNET_SEED", long, default_value_t = 0)]
    pub devnet_seed: u64,

    /// Maximum number of blocks in a batched response.
    #[clap(env = "BEACON_DEVNET_MAX_BATCH", long, value_name = "BLOCKS", default_value_t = 32)]
    pub devnet_max_batch: usize,

    /// How often the simulated peer announces its head.
    #[clap(env = "BEACON_DEVNET_ANNOUNCE_INTERVAL", long, default_value = "1s", value_parser = parse_duration)]
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub devnet_announce_interval: Duration,
}
