//! Typed broadcast channel shared by the instances of one session group
//!
//! Delivery is best-effort fan-out to every *other* open peer: a peer never
//! receives its own posts, peers that join later do not see earlier messages,
//! and a receiver that falls behind skips what it missed. There is no ordering
//! guarantee across senders.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::error::{MeshError, MeshResult};

/// Stream of messages received by one peer
pub type MessageStream<M> = Pin<Box<dyn Stream<Item = MeshResult<M>> + Send + 'static>>;

/// One peer's handle onto a broadcast channel carrying messages of kind `M`.
///
/// Each message kind gets its own channel so the payload type, and with it
/// the delivery contract, is visible at the interface.
#[async_trait]
pub trait BroadcastChannel<M>: Send + Sync
where
    M: Send + 'static,
{
    /// Post a message to every other open peer. Fire-and-forget: succeeds even
    /// when nobody is listening.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::ChannelClosed`] once this peer or the bus is closed.
    async fn post(&self, message: M) -> MeshResult<()>;

    /// Receive messages posted by other peers from now on. The stream ends
    /// when the channel closes.
    fn subscribe(&self) -> MeshResult<MessageStream<M>>;

    /// Detach this peer; its streams end and further posts fail
    fn close(&self);

    fn is_closed(&self) -> bool;
}

#[derive(Debug, Clone)]
struct Envelope<M> {
    from: u64,
    message: M,
}

struct BusShared<M> {
    sender: broadcast::Sender<Envelope<M>>,
    closed: watch::Sender<bool>,
    next_peer: AtomicU64,
    peers: AtomicUsize,
}

/// In-process bus built on `tokio::sync::broadcast`.
///
/// ```rust
/// use conclave_mesh::{BroadcastChannel, LocalBus};
/// use futures::StreamExt;
///
/// # tokio_test::block_on(async {
/// let bus: LocalBus<String> = LocalBus::new(16);
/// let alice = bus.connect();
/// let bob = bus.connect();
///
/// let mut inbox = bob.subscribe().unwrap();
/// alice.post("hello".to_string()).await.unwrap();
/// assert_eq!(inbox.next().await.unwrap().unwrap(), "hello");
/// # });
/// ```
pub struct LocalBus<M> {
    shared: Arc<BusShared<M>>,
}

impl<M> Clone for LocalBus<M> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<M> LocalBus<M>
where
    M: Clone + Send + Sync + 'static,
{
    /// Create a bus; `capacity` bounds how far a slow peer may lag before it
    /// starts skipping messages
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);
        Self {
            shared: Arc::new(BusShared {
                sender,
                closed,
                next_peer: AtomicU64::new(0),
                peers: AtomicUsize::new(0),
            }),
        }
    }

    /// Join the bus as a new peer
    pub fn connect(&self) -> LocalChannel<M> {
        let peer = self.shared.next_peer.fetch_add(1, Ordering::Relaxed);
        self.shared.peers.fetch_add(1, Ordering::SeqCst);
        let (detached, _) = watch::channel(false);
        debug!(peer, "Peer connected to local bus");
        LocalChannel {
            peer,
            shared: self.shared.clone(),
            detached: Arc::new(detached),
        }
    }

    /// Close the bus for every peer
    pub fn close(&self) {
        self.shared.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Number of connected peers; a peer counts until its handle is dropped
    pub fn peer_count(&self) -> usize {
        self.shared.peers.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions across all peers
    pub fn subscriber_count(&self) -> usize {
        self.shared.sender.receiver_count()
    }
}

/// A peer's handle onto a [`LocalBus`]
pub struct LocalChannel<M> {
    peer: u64,
    shared: Arc<BusShared<M>>,
    detached: Arc<watch::Sender<bool>>,
}

impl<M> LocalChannel<M> {
    fn closed_now(&self) -> bool {
        *self.shared.closed.borrow() || *self.detached.borrow()
    }
}

#[async_trait]
impl<M> BroadcastChannel<M> for LocalChannel<M>
where
    M: Clone + Send + Sync + 'static,
{
    async fn post(&self, message: M) -> MeshResult<()> {
        if self.closed_now() {
            return Err(MeshError::ChannelClosed);
        }
        // An error here only means no peer is subscribed right now.
        let _ = self.shared.sender.send(Envelope {
            from: self.peer,
            message,
        });
        Ok(())
    }

    fn subscribe(&self) -> MeshResult<MessageStream<M>> {
        if self.closed_now() {
            return Err(MeshError::ChannelClosed);
        }

        let own = self.peer;
        let state = (
            self.shared.sender.subscribe(),
            self.shared.closed.subscribe(),
            self.detached.subscribe(),
        );

        let stream = futures::stream::unfold(
            state,
            move |(mut receiver, mut closed, mut detached)| async move {
                loop {
                    if *closed.borrow() || *detached.borrow() {
                        return None;
                    }
                    tokio::select! {
                        changed = closed.changed() => {
                            if changed.is_err() {
                                return None;
                            }
                        }
                        changed = detached.changed() => {
                            if changed.is_err() {
                                return None;
                            }
                        }
                        received = receiver.recv() => match received {
                            Ok(envelope) if envelope.from == own => continue,
                            Ok(envelope) => {
                                let item: MeshResult<M> = Ok(envelope.message);
                                return Some((item, (receiver, closed, detached)));
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(peer = own, skipped, "Receiver lagged, messages dropped");
                            }
                            Err(broadcast::error::RecvError::Closed) => return None,
                        },
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }

    fn close(&self) {
        debug!(peer = self.peer, "Peer detached from local bus");
        self.detached.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        self.closed_now()
    }
}

impl<M> Drop for LocalChannel<M> {
    fn drop(&mut self) {
        self.detached.send_replace(true);
        self.shared.peers.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_to_other_peers_only() {
        let bus: LocalBus<u32> = LocalBus::new(8);
        let a = bus.connect();
        let b = bus.connect();
        let c = bus.connect();

        let mut a_in = a.subscribe().unwrap();
        let mut b_in = b.subscribe().unwrap();
        let mut c_in = c.subscribe().unwrap();

        a.post(7).await.unwrap();

        assert_eq!(b_in.next().await.unwrap().unwrap(), 7);
        assert_eq!(c_in.next().await.unwrap().unwrap(), 7);
        let own = tokio::time::timeout(Duration::from_millis(20), a_in.next()).await;
        assert!(own.is_err(), "sender must not receive its own post");
    }

    #[tokio::test]
    async fn peers_are_counted_until_dropped() {
        let bus: LocalBus<u32> = LocalBus::new(8);
        let a = bus.connect();
        let b = bus.connect();
        assert_eq!(bus.peer_count(), 2);
        assert_eq!(bus.subscriber_count(), 0);

        b.close();
        assert_eq!(bus.peer_count(), 2);
        drop(b);
        assert_eq!(bus.peer_count(), 1);
        drop(a);
        assert_eq!(bus.peer_count(), 0);
    }

    #[tokio::test]
    async fn post_without_listeners_succeeds() {
        let bus: LocalBus<u32> = LocalBus::new(8);
        let lonely = bus.connect();
        assert!(lonely.post(1).await.is_ok());
    }

    #[tokio::test]
    async fn closing_the_bus_ends_every_stream() {
        let bus: LocalBus<u32> = LocalBus::new(8);
        let a = bus.connect();
        let b = bus.connect();
        let mut b_in = b.subscribe().unwrap();

        bus.close();

        assert!(b_in.next().await.is_none());
        assert_eq!(a.post(1).await, Err(MeshError::ChannelClosed));
        assert!(b.subscribe().is_err());
        assert!(a.is_closed());
    }

    #[tokio::test]
    async fn detaching_one_peer_leaves_others_connected() {
        let bus: LocalBus<u32> = LocalBus::new(8);
        let a = bus.connect();
        let b = bus.connect();
        let c = bus.connect();
        let mut b_in = b.subscribe().unwrap();
        let mut c_in = c.subscribe().unwrap();

        b.close();
        assert!(b_in.next().await.is_none());

        a.post(3).await.unwrap();
        assert_eq!(c_in.next().await.unwrap().unwrap(), 3);
        assert!(!bus.is_closed());
    }

    #[tokio::test]
    async fn lagging_receiver_skips_and_continues() {
        let bus: LocalBus<u32> = LocalBus::new(2);
        let a = bus.connect();
        let b = bus.connect();
        let mut b_in = b.subscribe().unwrap();

        for n in 0..5 {
            a.post(n).await.unwrap();
        }

        // The two most recent messages survive the overflow.
        assert_eq!(b_in.next().await.unwrap().unwrap(), 3);
        assert_eq!(b_in.next().await.unwrap().unwrap(), 4);
    }
}
