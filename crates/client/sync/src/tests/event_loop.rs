use super::{anchor_state, make_chain};
use crate::{
    service_state_channel, InitialSync, InitialSyncConfig, InitialSyncService, MockRegularSync, MockSyncStatusQuery,
    SyncEvent, SyncOutcome,
};
use assert_matches::assert_matches;
use bc_db::InMemoryBackend;
use bc_p2p::{Envelope, LocalNetwork, Outbound, Payload, PeerId, Request, Topic};
use bp_block::Block;
use bp_utils::service::{BeaconServiceId, ServiceContext, ServiceMonitor};
use futures::channel::mpsc as tick_channel;
use rstest::rstest;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};

const PEER: PeerId = PeerId(7);
const TIMEOUT: Duration = Duration::from_secs(5);
const TOPICS: [Topic; 4] =
    [Topic::BlockAnnounce, Topic::BlockResponse, Topic::BatchedBlockResponse, Topic::CrystallizedStateResponse];

/// An initial sync event loop running in the background, driven by manual ticks.
struct RunningSync {
    network: LocalNetwork,
    backend: Arc<InMemoryBackend>,
    events: UnboundedReceiver<SyncEvent>,
    ticks: tick_channel::UnboundedSender<()>,
    ctx: ServiceContext,
    handle: JoinHandle<SyncOutcome>,
}

impl RunningSync {
    async fn spawn(regular_sync: MockRegularSync, config: InitialSyncConfig) -> Self {
        let network = LocalNetwork::new();
        let backend = Arc::new(InMemoryBackend::new());
        let (sender, events) = service_state_channel();
        let (ticks, tick_recv) = tick_channel::unbounded();
        let ctx = ServiceContext::new();

        let sync = InitialSync::new(
            Arc::new(network.clone()),
            backend.clone(),
            Arc::new(regular_sync),
            config.service_state_sender(sender),
        );
        let handle = tokio::spawn(sync.run_with_ticks(ctx.child(), tick_recv));
        wait_subscribed(&network).await;

        Self { network, backend, events, ticks, ctx, handle }
    }

    fn publish_block(&self, block: &Block) {
        self.network.publish(Topic::BlockResponse, Envelope::new(Some(PEER), Payload::Block(block.clone())));
    }

    fn tick(&self) {
        self.ticks.unbounded_send(()).expect("event loop exited");
    }

    async fn next_event(&mut self) -> SyncEvent {
        tokio::time::timeout(TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for a sync event")
            .expect("event channel closed")
    }

    async fn join(self) -> SyncOutcome {
        let outcome = tokio::time::timeout(TIMEOUT, self.handle).await.expect("sync did not exit").unwrap();
        for topic in TOPICS {
            assert_eq!(self.network.subscriber_count(topic), 0, "{topic} still subscribed");
        }
        outcome
    }
}

async fn wait_subscribed(network: &LocalNetwork) {
    tokio::time::timeout(TIMEOUT, async {
        while TOPICS.iter().any(|topic| network.subscriber_count(*topic) == 0) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("initial sync never subscribed");
}

fn handoff_once() -> MockRegularSync {
    let mut regular_sync = MockRegularSync::new();
    regular_sync.expect_resume_sync().times(1).return_const(());
    regular_sync
}

fn no_handoff() -> MockRegularSync {
    let mut regular_sync = MockRegularSync::new();
    regular_sync.expect_resume_sync().never();
    regular_sync
}

#[tokio::test]
async fn syncs_out_of_order_chain_and_hands_off() {
    let state = anchor_state(3);
    let chain = make_chain(6, &state);
    let mut sync = RunningSync::spawn(handoff_once(), InitialSyncConfig::default()).await;

    sync.publish_block(&chain[0]);
    assert_eq!(
        sync.next_event().await,
        SyncEvent::Anchored { slot: 1, anchor_root: chain[0].crystallized_state_root }
    );
    assert!(sync.network.requests().contains(&Outbound::Send {
        request: Request::CrystallizedState { hash: chain[0].crystallized_state_root },
        peer: PEER,
    }));

    sync.network.publish(
        Topic::CrystallizedStateResponse,
        Envelope::new(Some(PEER), Payload::CrystallizedState(state.clone())),
    );
    assert_eq!(sync.next_event().await, SyncEvent::StateMatched { finalized_slot: 3 });

    for slot in [6, 4, 5] {
        sync.publish_block(&chain[slot - 1]);
    }
    for slot in 4..=6 {
        assert_eq!(sync.next_event().await, SyncEvent::Committed { slot });
    }

    sync.tick();
    assert_eq!(sync.next_event().await, SyncEvent::Converged { slot: 6 });

    let backend = Arc::clone(&sync.backend);
    assert_eq!(sync.join().await, SyncOutcome::Converged);
    assert_eq!(backend.head_slot(), Some(6));
    assert_eq!(backend.block_count(), 4, "Slots 2 and 3 are covered by the crystallized state");
    assert_eq!(backend.crystallized_state().unwrap(), Some(state));
}

#[tokio::test]
async fn batched_response_and_announcements() {
    let chain = make_chain(4, &anchor_state(0));
    let mut sync = RunningSync::spawn(handoff_once(), InitialSyncConfig::default()).await;

    sync.network.publish(Topic::BlockAnnounce, Envelope::new(None, Payload::BlockAnnounce { slot: 4 }));
    sync.publish_block(&chain[0]);
    assert_matches!(sync.next_event().await, SyncEvent::Anchored { slot: 1, .. });

    sync.network.publish(
        Topic::BatchedBlockResponse,
        Envelope::new(
            Some(PEER),
            Payload::BatchedBlocks {
                start_slot: 2,
                end_slot: 4,
                blocks: vec![chain[3].clone(), chain[1].clone(), chain[2].clone()],
            },
        ),
    );
    for slot in 2..=4 {
        assert_eq!(sync.next_event().await, SyncEvent::Committed { slot });
    }

    sync.tick();
    assert_eq!(sync.next_event().await, SyncEvent::Converged { slot: 4 });
    assert_eq!(sync.join().await, SyncOutcome::Converged);
}

#[tokio::test]
async fn malformed_messages_are_ignored() {
    let state = anchor_state(0);
    let chain = make_chain(1, &state);
    let mut sync = RunningSync::spawn(handoff_once(), InitialSyncConfig::default()).await;

    for payload in [Payload::BlockAnnounce { slot: 50 }, Payload::CrystallizedState(state)] {
        sync.network.publish(Topic::BlockResponse, Envelope::new(Some(PEER), payload));
    }
    sync.publish_block(&chain[0]);
    assert_matches!(sync.next_event().await, SyncEvent::Anchored { slot: 1, .. });

    // Slot 50 was never observed, so the anchor alone is the head.
    sync.tick();
    assert_eq!(sync.next_event().await, SyncEvent::Converged { slot: 1 });
    assert_eq!(sync.join().await, SyncOutcome::Converged);
}

#[tokio::test]
async fn failed_write_is_replayed_without_tick() {
    let chain = make_chain(2, &anchor_state(0));
    let mut sync = RunningSync::spawn(no_handoff(), InitialSyncConfig::default()).await;

    sync.publish_block(&chain[0]);
    assert_matches!(sync.next_event().await, SyncEvent::Anchored { slot: 1, .. });

    sync.backend.fail_next_writes(1);
    sync.publish_block(&chain[1]);
    assert_eq!(sync.next_event().await, SyncEvent::Committed { slot: 2 });
    assert_eq!(sync.backend.head_slot(), Some(2));

    sync.ctx.cancel_local();
    assert_eq!(sync.join().await, SyncOutcome::Cancelled);
}

#[tokio::test]
async fn cancellation_releases_subscriptions() {
    let sync = RunningSync::spawn(no_handoff(), InitialSyncConfig::default()).await;
    sync.tick();
    sync.ctx.cancel_local();
    assert_eq!(sync.join().await, SyncOutcome::Cancelled);
}

#[rstest]
#[case::stops_node(true)]
#[case::keeps_node(false)]
#[tokio::test]
async fn stop_on_sync(#[case] global_stop_on_sync: bool) {
    let chain = make_chain(1, &anchor_state(0));
    let config = InitialSyncConfig::default().global_stop_on_sync(global_stop_on_sync);
    let mut sync = RunningSync::spawn(handoff_once(), config).await;

    sync.publish_block(&chain[0]);
    assert_matches!(sync.next_event().await, SyncEvent::Anchored { .. });
    sync.tick();

    let ctx = sync.ctx.clone();
    assert_eq!(sync.join().await, SyncOutcome::Converged);
    assert_eq!(ctx.is_cancelled(), global_stop_on_sync);
}

fn status_query(synced: anyhow::Result<bool>) -> MockSyncStatusQuery {
    let mut query = MockSyncStatusQuery::new();
    let mut synced = Some(synced);
    query.expect_is_synced().times(1).returning(move || synced.take().expect("queried twice"));
    query
}

fn service(network: &LocalNetwork, query: MockSyncStatusQuery, regular_sync: MockRegularSync) -> InitialSyncService {
    InitialSyncService::new(
        Arc::new(network.clone()),
        Arc::new(InMemoryBackend::new()),
        Arc::new(query),
        Arc::new(regular_sync),
        InitialSyncConfig::default().polling_interval(Duration::from_millis(10)),
    )
}

#[tokio::test]
async fn service_skips_synced_chain() {
    let network = LocalNetwork::new();
    let service = service(&network, status_query(Ok(true)), no_handoff());

    assert_eq!(service.run(ServiceContext::new()).await, SyncOutcome::AlreadySynced);
    assert!(network.requests().is_empty());
    assert_eq!(network.subscriber_count(Topic::BlockResponse), 0);
}

#[tokio::test]
async fn service_syncs_when_status_query_fails() {
    let network = LocalNetwork::new();
    let service = service(&network, status_query(Err(anyhow::anyhow!("no peers"))), handoff_once());
    let chain = make_chain(1, &anchor_state(0));

    let handle = tokio::spawn({
        let service = service.clone();
        async move { service.run(ServiceContext::new()).await }
    });
    wait_subscribed(&network).await;
    network.publish(Topic::BlockResponse, Envelope::new(Some(PEER), Payload::Block(chain[0].clone())));

    let outcome = tokio::time::timeout(TIMEOUT, handle).await.expect("sync did not converge").unwrap();
    assert_eq!(outcome, SyncOutcome::Converged);
}

#[tokio::test]
async fn service_stopped_before_start() {
    let network = LocalNetwork::new();
    let mut query = MockSyncStatusQuery::new();
    query.expect_is_synced().never();
    let service = service(&network, query, no_handoff());

    let stop = service.stop_handle();
    assert!(stop.stop());
    assert!(!service.stop(), "Stopping twice has no effect");
    assert!(stop.is_stopped());
    assert_eq!(service.run(ServiceContext::new()).await, SyncOutcome::Cancelled);
}

#[tokio::test]
async fn service_stopped_while_syncing() {
    let network = LocalNetwork::new();
    let service = service(&network, status_query(Ok(false)), no_handoff());

    let handle = tokio::spawn({
        let service = service.clone();
        async move { service.run(ServiceContext::new()).await }
    });
    wait_subscribed(&network).await;
    assert!(service.stop());

    let outcome = tokio::time::timeout(TIMEOUT, handle).await.expect("sync did not stop").unwrap();
    assert_eq!(outcome, SyncOutcome::Cancelled);
    for topic in TOPICS {
        assert_eq!(network.subscriber_count(topic), 0);
    }
}

#[tokio::test]
async fn service_under_monitor() {
    let network = LocalNetwork::new();
    let monitor = ServiceMonitor::default().with(service(&network, status_query(Ok(true)), no_handoff())).unwrap();
    monitor.activate(BeaconServiceId::InitialSync);

    tokio::time::timeout(TIMEOUT, monitor.start()).await.expect("monitor did not exit").unwrap();
    assert!(network.requests().is_empty());
}
