use crate::{Envelope, P2pApi, PeerId, Request, Subscription, Topic};
use dashmap::DashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, Weak,
};
use tokio::sync::mpsc;

/// A request which left the node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Send { request: Request, peer: PeerId },
    Broadcast { request: Request },
}

impl Outbound {
    pub fn request(&self) -> &Request {
        match self {
            Self::Send { request, .. } | Self::Broadcast { request } => request,
        }
    }
}

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<Envelope>,
}

#[derive(Default)]
struct Inner {
    topics: DashMap<Topic, Vec<Subscriber>>,
    next_id: AtomicU64,
    outbound: Mutex<Vec<Outbound>>,
    tap: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
}

/// In-process pub-sub network.
///
/// Inbound messages are injected with [LocalNetwork::publish]. Outbound requests are recorded and can
/// be read back with [LocalNetwork::requests], or streamed to a simulated peer with
/// [LocalNetwork::outbound_tap].
#[derive(Clone, Default)]
pub struct LocalNetwork(Arc<Inner>);

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `envelope` to every subscriber of `topic`, returning how many received it. Subscribers
    /// whose queue is full miss the message.
    pub fn publish(&self, topic: Topic, envelope: Envelope) -> usize {
        let Some(mut subscribers) = self.0.topics.get_mut(&topic) else {
            tracing::trace!("No subscriber for {topic}, dropping message");
            return 0;
        };

        let mut delivered = 0;
        subscribers.retain(|sub| match sub.sender.try_send(envelope.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("Subscriber queue for {topic} is full, dropping message");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        delivered
    }

    /// Number of live subscriptions to `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.0.topics.get(&topic).map(|subs| subs.len()).unwrap_or(0)
    }

    /// Every request sent so far, in order.
    pub fn requests(&self) -> Vec<Outbound> {
        self.0.outbound.lock().expect("outbound log lock poisoned").clone()
    }

    pub fn clear_requests(&self) {
        self.0.outbound.lock().expect("outbound log lock poisoned").clear();
    }

    /// Streams every subsequent outbound request. Replaces any previous tap.
    pub fn outbound_tap(&self) -> mpsc::UnboundedReceiver<Outbound> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.0.tap.lock().expect("outbound tap lock poisoned") = Some(sender);
        receiver
    }

    fn record(&self, outbound: Outbound) {
        tracing::trace!("Outbound request: {outbound:?}");
        if let Some(tap) = self.0.tap.lock().expect("outbound tap lock poisoned").as_ref() {
            let _ = tap.send(outbound.clone());
        }
        self.0.outbound.lock().expect("outbound log lock poisoned").push(outbound);
    }

    fn unsubscribe(inner: &Weak<Inner>, topic: Topic, id: u64) {
        let Some(inner) = inner.upgrade() else { return };
        if let dashmap::Entry::Occupied(mut entry) = inner.topics.entry(topic) {
            entry.get_mut().retain(|sub| sub.id != id);
            if entry.get().is_empty() {
                entry.remove();
            }
        };
    }
}

impl P2pApi for LocalNetwork {
    fn subscribe(&self, topic: Topic, buffer: usize) -> Subscription {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let id = self.0.next_id.fetch_add(1, Ordering::Relaxed);
        self.0.topics.entry(topic).or_default().push(Subscriber { id, sender });

        let inner = Arc::downgrade(&self.0);
        Subscription::with_unsubscribe(topic, receiver, move || Self::unsubscribe(&inner, topic, id))
    }

    fn send(&self, request: Request, peer: PeerId) {
        self.record(Outbound::Send { request, peer });
    }

    fn broadcast(&self, request: Request) {
        self.record(Outbound::Broadcast { request });
    }
}
