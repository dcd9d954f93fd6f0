use crate::{
    drain::drain_buffer,
    engine::{StateOutcome, SyncEngine, TickOutcome},
    handoff::{HandoffTrigger, RegularSync},
    InitialSyncConfig, SyncEvent,
};
use bc_db::BlockStore;
use bc_p2p::{Envelope, P2pApi, Payload, Subscription, Topic};
use bp_utils::{service::ServiceContext, AbortOnDrop};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, watch},
    time::{Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::IntervalStream;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SyncOutcome {
    /// The network reported the chain as synced, nothing was done.
    AlreadySynced,
    /// Handed off to regular sync.
    Converged,
    Cancelled,
}

/// The four inbound streams. A `None` subscription has been released.
struct Subscriptions {
    block_announce: Option<Subscription>,
    block: Option<Subscription>,
    batched_blocks: Option<Subscription>,
    crystallized_state: Option<Subscription>,
}

impl Subscriptions {
    fn subscribe(p2p: &dyn P2pApi, config: &InitialSyncConfig) -> Self {
        Self {
            block_announce: Some(p2p.subscribe(Topic::BlockAnnounce, config.block_announce_buffer_size)),
            block: Some(p2p.subscribe(Topic::BlockResponse, config.block_buffer_size)),
            batched_blocks: Some(p2p.subscribe(Topic::BatchedBlockResponse, config.batched_block_buffer_size)),
            crystallized_state: Some(
                p2p.subscribe(Topic::CrystallizedStateResponse, config.crystallized_state_buffer_size),
            ),
        }
    }

    fn release(&mut self, topic: Topic) {
        let sub = match topic {
            Topic::BlockAnnounce => &mut self.block_announce,
            Topic::BlockResponse => &mut self.block,
            Topic::BatchedBlockResponse => &mut self.batched_blocks,
            Topic::CrystallizedStateResponse => &mut self.crystallized_state,
        };
        if sub.take().is_some() {
            tracing::debug!("Unsubscribed from {topic}");
        }
    }
}

async fn next_message(sub: &mut Option<Subscription>) -> Option<Envelope> {
    match sub {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

/// The initial sync event loop.
///
/// Owns the [SyncEngine] and feeds it one input at a time: polling ticks, the four subscriptions and
/// replay requests from the buffer drain task.
pub struct InitialSync {
    engine: SyncEngine,
    p2p: Arc<dyn P2pApi>,
    handoff: HandoffTrigger,
    config: InitialSyncConfig,
}

impl InitialSync {
    pub fn new(
        p2p: Arc<dyn P2pApi>,
        store: Arc<dyn BlockStore>,
        regular_sync: Arc<dyn RegularSync>,
        config: InitialSyncConfig,
    ) -> Self {
        Self {
            engine: SyncEngine::new(Arc::clone(&p2p), store, &config),
            p2p,
            handoff: HandoffTrigger::new(regular_sync),
            config,
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Runs until convergence or cancellation, polling every [InitialSyncConfig::polling_interval].
    pub async fn run(self, ctx: ServiceContext) -> SyncOutcome {
        let period = self.config.polling_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.run_with_ticks(ctx, IntervalStream::new(interval).map(|_| ())).await
    }

    /// Same as [InitialSync::run], with an arbitrary source of polling ticks.
    pub async fn run_with_ticks(
        mut self,
        mut ctx: ServiceContext,
        mut ticks: impl Stream<Item = ()> + Unpin + Send,
    ) -> SyncOutcome {
        let mut subs = Subscriptions::subscribe(&*self.p2p, &self.config);

        let (progress_sender, progress_recv) = watch::channel(self.engine.progress());
        let (replay_sender, mut replay_recv) = mpsc::channel(1);
        let _drain = AbortOnDrop::spawn(drain_buffer(ctx.clone(), progress_recv, replay_sender));

        let status_period = self.config.status_interval;
        let mut status = tokio::time::interval_at(Instant::now() + status_period, status_period);
        status.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    tracing::debug!("Exiting initial sync");
                    break SyncOutcome::Cancelled;
                }
                Some(()) = ticks.next() => {
                    if self.engine.on_tick() == TickOutcome::Converged {
                        break SyncOutcome::Converged;
                    }
                }
                _ = status.tick() => self.engine.show_status(),
                msg = next_message(&mut subs.block_announce) => self.on_message(Topic::BlockAnnounce, msg, &mut subs),
                msg = next_message(&mut subs.block) => self.on_message(Topic::BlockResponse, msg, &mut subs),
                msg = next_message(&mut subs.batched_blocks) => {
                    self.on_message(Topic::BatchedBlockResponse, msg, &mut subs)
                }
                msg = next_message(&mut subs.crystallized_state) => {
                    self.on_message(Topic::CrystallizedStateResponse, msg, &mut subs)
                }
                Some(slot) = replay_recv.recv() => self.engine.on_replay(slot),
            }

            let progress = self.engine.progress();
            progress_sender.send_if_modified(|current| {
                let modified = *current != progress;
                *current = progress;
                modified
            });
        };

        // Releases all remaining subscriptions and closes their queues.
        drop(subs);
        self.engine.finish();

        if outcome == SyncOutcome::Converged {
            let slot = self.engine.state().current_slot();
            self.engine.show_status();
            self.engine.send_event(SyncEvent::Converged { slot });
            self.handoff.fire();
            if self.config.global_stop_on_sync {
                tracing::info!("🌐 Reached stop-on-sync condition, shutting down node...");
                ctx.cancel_global();
            }
        }
        outcome
    }

    fn on_message(&mut self, topic: Topic, msg: Option<Envelope>, subs: &mut Subscriptions) {
        let Some(Envelope { peer, payload }) = msg else {
            tracing::warn!("Subscription to {topic} was closed");
            subs.release(topic);
            return;
        };

        match (topic, payload) {
            (Topic::BlockAnnounce, Payload::BlockAnnounce { slot }) => self.engine.on_block_announce(slot),
            (Topic::BlockResponse, Payload::Block(block)) => self.engine.on_block(block, peer),
            (Topic::BatchedBlockResponse, Payload::BatchedBlocks { start_slot, end_slot, blocks }) => {
                tracing::debug!("Processing batched block response for slots {start_slot} to {end_slot}");
                self.engine.on_batched_blocks(blocks, peer);
            }
            (Topic::CrystallizedStateResponse, Payload::CrystallizedState(state)) => {
                if self.engine.on_crystallized_state(state) == StateOutcome::Matched {
                    subs.release(Topic::CrystallizedStateResponse);
                }
            }
            (topic, payload) => {
                tracing::debug!("Discarding malformed message on {topic}: got a {} payload", payload.topic())
            }
        }
    }
}
