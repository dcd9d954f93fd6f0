//! Message source of the beacon node.
//!
//! Services never talk to the network directly: they go through a [P2pApi], which exposes typed
//! [Topic] subscriptions, peer-directed requests and broadcasts. [LocalNetwork] is an in-process
//! implementation used by the devnet and by tests.

mod local;
mod messages;

pub use local::{LocalNetwork, Outbound};
pub use messages::*;

use tokio::sync::mpsc;

/// Inbound stream of messages for a single [Topic].
///
/// Dropping the subscription unsubscribes from the topic and closes the queue.
pub struct Subscription {
    topic: Topic,
    receiver: mpsc::Receiver<Envelope>,
    on_drop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(topic: Topic, receiver: mpsc::Receiver<Envelope>) -> Self {
        Self { topic, receiver, on_drop: None }
    }

    /// `unsubscribe` runs once, when the subscription is dropped.
    pub fn with_unsubscribe(
        topic: Topic,
        receiver: mpsc::Receiver<Envelope>,
        unsubscribe: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self { topic, receiver, on_drop: Some(Box::new(unsubscribe)) }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Returns [None] once the producer side is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.receiver.close();
        if let Some(unsubscribe) = self.on_drop.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("topic", &self.topic).finish_non_exhaustive()
    }
}

/// Subscribe, send and broadcast primitives over typed messages.
///
/// Sending is fire-and-forget: there is no delivery acknowledgement and responses arrive, if at
/// all, on the matching response topic.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait P2pApi: Send + Sync {
    /// Subscribes to `topic`. Messages which do not fit in a queue of `buffer` elements are dropped.
    fn subscribe(&self, topic: Topic, buffer: usize) -> Subscription;

    /// Sends a request to a single peer.
    fn send(&self, request: Request, peer: PeerId);

    /// Sends a request to every peer.
    fn broadcast(&self, request: Request);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    #[tokio::test]
    async fn subscription_unsubscribes_once_on_drop() {
        let called = Arc::new(AtomicBool::new(false));
        let (_sender, receiver) = mpsc::channel(1);
        let called_ = Arc::clone(&called);
        let sub = Subscription::with_unsubscribe(Topic::BlockAnnounce, receiver, move || {
            assert!(!called_.swap(true, Ordering::SeqCst));
        });
        assert_eq!(sub.topic(), Topic::BlockAnnounce);
        drop(sub);
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dropping_subscription_closes_queue() {
        let (sender, receiver) = mpsc::channel(1);
        drop(Subscription::new(Topic::BlockResponse, receiver));
        assert!(sender.is_closed());
    }

    #[tokio::test]
    async fn mock_p2p_api() {
        let mut p2p = MockP2pApi::new();
        p2p.expect_broadcast()
            .withf(|req| req == &Request::BatchedBlocks { start_slot: 2, end_slot: 4 })
            .times(1)
            .return_const(());
        p2p.broadcast(Request::BatchedBlocks { start_slot: 2, end_slot: 4 });
    }
}
