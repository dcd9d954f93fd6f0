use crate::cli::DevnetParams;
use anyhow::Context;
use bc_p2p::{Envelope, LocalNetwork, Outbound, Payload, PeerId, Request, Topic};
use bp_block::{Block, CrystallizedState, Hash32, Slot};
use bp_utils::service::{BeaconServiceId, Service, ServiceId, ServiceRunner};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::{sync::Arc, time::Duration};

const GENESIS_TIME: u64 = 1_700_000_000;
const SLOT_DURATION: u64 = 8;

/// A generated chain, with every block committing to the same crystallized state.
#[derive(Debug)]
pub struct DevnetChain {
    blocks: Vec<Block>,
    state: CrystallizedState,
    state_root: Hash32,
}

impl DevnetChain {
    pub fn generate(params: &DevnetParams) -> anyhow::Result<Self> {
        let finalized = params.devnet_finalized_slot;
        let state = CrystallizedState {
            last_state_recalc: finalized,
            last_justified_slot: finalized,
            justified_streak: 1,
            last_finalized_slot: finalized,
            current_dynasty: 1,
            dynasty_seed: Hash32::keccak256(&params.devnet_seed.to_be_bytes()),
            dynasty_start: 0,
        };
        let state_root = state.hash().context("Hashing devnet crystallized state")?;

        let mut blocks = Vec::with_capacity(params.devnet_chain_length as usize);
        let mut parent_hash = Hash32::ZERO;
        for slot in 1..=params.devnet_chain_length {
            let block = Block {
                slot,
                parent_hash,
                crystallized_state_root: state_root,
                active_state_root: Hash32::keccak256(&[params.devnet_seed.to_be_bytes(), slot.to_be_bytes()].concat()),
                timestamp: GENESIS_TIME + slot * SLOT_DURATION,
            };
            parent_hash = block.hash().with_context(|| format!("Hashing devnet block {slot}"))?;
            blocks.push(block);
        }

        Ok(Self { blocks, state, state_root })
    }

    pub fn head_slot(&self) -> Slot {
        self.blocks.len() as Slot
    }

    pub fn block(&self, slot: Slot) -> Option<&Block> {
        slot.checked_sub(1).and_then(|i| self.blocks.get(i as usize))
    }

    /// Blocks in `start..=end`, clamped to the chain.
    fn range(&self, start: Slot, end: Slot) -> &[Block] {
        let start = start.max(1).min(self.head_slot() + 1) as usize - 1;
        let end = (end.min(self.head_slot()) as usize).max(start);
        &self.blocks[start..end]
    }
}

/// Simulated peer on the [LocalNetwork]. Announces its head and answers every request the node sends,
/// shuffling batched responses.
#[derive(Clone)]
pub struct DevnetPeer {
    network: LocalNetwork,
    chain: Arc<DevnetChain>,
    id: PeerId,
    seed: u64,
    max_batch: usize,
    announce_interval: Duration,
}

impl DevnetPeer {
    pub fn new(network: LocalNetwork, chain: Arc<DevnetChain>, params: &DevnetParams) -> Self {
        Self {
            network,
            chain,
            id: PeerId(params.devnet_seed),
            seed: params.devnet_seed,
            max_batch: params.devnet_max_batch.max(1),
            announce_interval: params.devnet_announce_interval,
        }
    }

    fn announce(&self) {
        let slot = self.chain.head_slot();
        self.publish(Topic::BlockAnnounce, Payload::BlockAnnounce { slot });
    }

    fn respond(&self, request: &Request, rng: &mut StdRng) {
        match *request {
            Request::BlockBySlot { slot } => match self.chain.block(slot) {
                Some(block) => self.publish(Topic::BlockResponse, Payload::Block(block.clone())),
                None => tracing::trace!("Devnet peer has no block at slot {slot}"),
            },
            Request::BatchedBlocks { start_slot, end_slot } => {
                let end_slot = end_slot.min(start_slot.saturating_add(self.max_batch as Slot - 1));
                let mut blocks = self.chain.range(start_slot, end_slot).to_vec();
                if blocks.is_empty() {
                    return;
                }
                blocks.shuffle(rng);
                self.publish(Topic::BatchedBlockResponse, Payload::BatchedBlocks { start_slot, end_slot, blocks });
            }
            Request::CrystallizedState { hash } if hash == self.chain.state_root => {
                self.publish(Topic::CrystallizedStateResponse, Payload::CrystallizedState(self.chain.state.clone()))
            }
            Request::CrystallizedState { hash } => tracing::trace!("Devnet peer has no crystallized state {hash}"),
        }
    }

    fn publish(&self, topic: Topic, payload: Payload) {
        self.network.publish(topic, Envelope::new(Some(self.id), payload));
    }
}

#[async_trait::async_trait]
impl Service for DevnetPeer {
    async fn start<'a>(&mut self, runner: ServiceRunner<'a>) -> anyhow::Result<()> {
        let this = self.clone();
        let mut requests = self.network.outbound_tap();
        tracing::info!(
            "🧪 Devnet peer serving {} blocks, finalized at slot {}",
            this.chain.head_slot(),
            this.chain.state.last_finalized_slot
        );

        runner.service_loop(move |mut ctx| async move {
            let mut rng = StdRng::seed_from_u64(this.seed);
            let mut announce = tokio::time::interval(this.announce_interval);
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = announce.tick() => this.announce(),
                    Some(outbound) = requests.recv() => {
                        if let Outbound::Send { peer, .. } = &outbound {
                            if *peer != this.id {
                                continue;
                            }
                        }
                        this.respond(outbound.request(), &mut rng);
                    }
                }
            }
            anyhow::Ok(())
        });
        Ok(())
    }
}

impl ServiceId for DevnetPeer {
    #[inline(always)]
    fn svc_id(&self) -> BeaconServiceId {
        BeaconServiceId::P2p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bc_p2p::P2pApi;
    use rstest::{fixture, rstest};

    #[fixture]
    fn params() -> DevnetParams {
        DevnetParams {
            devnet_chain_length: 10,
            devnet_finalized_slot: 4,
            devnet_seed: 3,
            devnet_max_batch: 4,
            devnet_announce_interval: Duration::from_millis(10),
        }
    }

    #[rstest]
    fn generated_chain_is_linked(params: DevnetParams) {
        let chain = DevnetChain::generate(&params).unwrap();
        assert_eq!(chain.head_slot(), 10);
        assert_eq!(chain.block(0), None);
        assert_eq!(chain.block(11), None);
        for slot in 2..=10 {
            let block = chain.block(slot).unwrap();
            assert_eq!(block.slot, slot);
            assert_eq!(block.parent_hash, chain.block(slot - 1).unwrap().hash().unwrap());
            assert_eq!(block.crystallized_state_root, chain.state.hash().unwrap());
        }
    }

    #[rstest]
    #[case::inside(2, 5, 2..=5)]
    #[case::past_head(8, 20, 8..=10)]
    #[case::from_zero(0, 2, 1..=2)]
    fn range_is_clamped(
        params: DevnetParams,
        #[case] start: Slot,
        #[case] end: Slot,
        #[case] expected: std::ops::RangeInclusive<Slot>,
    ) {
        let chain = DevnetChain::generate(&params).unwrap();
        let slots: Vec<_> = chain.range(start, end).iter().map(|b| b.slot).collect();
        assert_eq!(slots, expected.collect::<Vec<_>>());
        assert!(chain.range(11, 20).is_empty());
        assert!(chain.range(5, 4).is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn answers_requests(params: DevnetParams) {
        let network = LocalNetwork::new();
        let chain = Arc::new(DevnetChain::generate(&params).unwrap());
        let peer = DevnetPeer::new(network.clone(), Arc::clone(&chain), &params);
        let mut rng = StdRng::seed_from_u64(0);

        let mut block_sub = network.subscribe(Topic::BlockResponse, 8);
        let mut batches = network.subscribe(Topic::BatchedBlockResponse, 8);
        let mut states = network.subscribe(Topic::CrystallizedStateResponse, 8);

        peer.respond(&Request::BlockBySlot { slot: 3 }, &mut rng);
        assert_eq!(block_sub.recv().await.unwrap().payload, Payload::Block(chain.block(3).unwrap().clone()));

        peer.respond(&Request::BatchedBlocks { start_slot: 2, end_slot: 10 }, &mut rng);
        let Payload::BatchedBlocks { start_slot, end_slot, mut blocks } = batches.recv().await.unwrap().payload else {
            panic!("expected a batched response");
        };
        assert_eq!((start_slot, end_slot), (2, 5));
        blocks.sort_by_key(|b| b.slot);
        assert_eq!(blocks.iter().map(|b| b.slot).collect::<Vec<_>>(), vec![2, 3, 4, 5]);

        peer.respond(&Request::CrystallizedState { hash: Hash32::ZERO }, &mut rng);
        peer.respond(&Request::CrystallizedState { hash: chain.state_root }, &mut rng);
        let envelope = states.recv().await.unwrap();
        assert_eq!(envelope.peer, Some(PeerId(3)));
        assert_eq!(envelope.payload, Payload::CrystallizedState(chain.state.clone()));
    }
}
