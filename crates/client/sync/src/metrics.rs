use crate::counter::ThroughputCounter;
use bc_analytics::{register_counter_metric_instrument, register_gauge_metric_instrument};
use bp_block::Slot;
use opentelemetry::{
    global,
    metrics::{Counter, Gauge},
    InstrumentationScope, KeyValue,
};
use std::time::Duration;

pub struct SyncMetrics {
    /// Built-in throughput counter, for logging purposes
    pub counter: ThroughputCounter,

    pub current_slot: Gauge<u64>,
    pub highest_observed_slot: Gauge<u64>,
    pub buffered_blocks: Gauge<u64>,
    pub committed_blocks: Counter<u64>,
}

impl SyncMetrics {
    pub fn register() -> Self {
        let meter = global::meter_with_scope(
            InstrumentationScope::builder("crates.sync.opentelemetry")
                .with_attributes([KeyValue::new("crate", "sync")])
                .build(),
        );

        let current_slot = register_gauge_metric_instrument(
            &meter,
            "initial_sync_current_slot".to_string(),
            "Highest slot committed by the initial sync".to_string(),
            "slot".to_string(),
        );
        let highest_observed_slot = register_gauge_metric_instrument(
            &meter,
            "initial_sync_highest_observed_slot".to_string(),
            "Highest slot seen on the network".to_string(),
            "slot".to_string(),
        );
        let buffered_blocks = register_gauge_metric_instrument(
            &meter,
            "initial_sync_buffered_blocks".to_string(),
            "Blocks held in memory ahead of the cursor".to_string(),
            "block".to_string(),
        );
        let committed_blocks = register_counter_metric_instrument(
            &meter,
            "initial_sync_committed_blocks".to_string(),
            "Blocks committed to storage by the initial sync".to_string(),
            "block".to_string(),
        );

        Self {
            counter: ThroughputCounter::new(Duration::from_secs(5 * 60)),
            current_slot,
            highest_observed_slot,
            buffered_blocks,
            committed_blocks,
        }
    }

    pub fn update(&self, current_slot: Slot, highest_observed_slot: Slot, buffered_blocks: usize) {
        self.current_slot.record(current_slot, &[]);
        self.highest_observed_slot.record(highest_observed_slot, &[]);
        self.buffered_blocks.record(buffered_blocks as u64, &[]);
    }

    pub fn block_committed(&mut self) {
        self.counter.increment();
        self.committed_blocks.add(1, &[]);
    }
}
