//! Subscriber registry for connected WebSocket clients
//!
//! Tracks one message sink per live connection and fans broadcasts out to
//! all of them. A sink that fails a send is removed from the registry.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use tracker_core::{MarketSnapshot, ServerMessage, TransportError};

/// Unique identifier for a WebSocket client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Outbound half of a client connection
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, message: ServerMessage) -> Result<(), TransportError>;
}

/// Sink backed by a connection's outgoing queue
///
/// Sends never wait: a full queue means the client is not keeping up and
/// is reported as [`TransportError::Backpressure`].
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ServerMessage>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ServerMessage>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send(&self, message: ServerMessage) -> Result<(), TransportError> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Backpressure(self.tx.max_capacity()),
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

/// Outcome of one broadcast pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Subscribers removed because their send failed
    pub dropped: Vec<ClientId>,
}

/// Set of live subscribers
pub struct SubscriberRegistry {
    /// Next client ID to assign
    next_client_id: AtomicU64,
    subscribers: DashMap<ClientId, Arc<dyn MessageSink>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            next_client_id: AtomicU64::new(1),
            subscribers: DashMap::new(),
        }
    }

    /// Generate a new unique client ID
    pub fn new_client_id(&self) -> ClientId {
        ClientId(self.next_client_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn register(&self, client_id: ClientId, sink: Arc<dyn MessageSink>) {
        self.subscribers.insert(client_id, sink);
        info!(
            "Registered {} ({} active connections)",
            client_id,
            self.subscribers.len()
        );
    }

    /// Remove a subscriber; returns `false` if it was already gone
    pub fn unregister(&self, client_id: ClientId) -> bool {
        let removed = self.subscribers.remove(&client_id).is_some();
        if removed {
            info!(
                "Unregistered {} ({} active connections)",
                client_id,
                self.subscribers.len()
            );
        }
        removed
    }

    pub fn contains(&self, client_id: ClientId) -> bool {
        self.subscribers.contains_key(&client_id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Send `message` to every current subscriber
    ///
    /// Works over a copy of the subscriber set, so connections registering
    /// or leaving mid-pass never block on the map.
    pub async fn broadcast(&self, message: ServerMessage) -> BroadcastReport {
        let targets: Vec<(ClientId, Arc<dyn MessageSink>)> = self
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        let mut report = BroadcastReport::default();
        for (client_id, sink) in targets {
            match sink.send(message.clone()).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Dropping {} after failed send: {}", client_id, e);
                    if self.unregister(client_id) {
                        report.dropped.push(client_id);
                    }
                }
            }
        }

        debug!(
            "Broadcast {} to {} clients ({} dropped)",
            message.kind(),
            report.delivered,
            report.dropped.len()
        );
        report
    }

    /// Broadcast a snapshot wrapped in the `market_update` envelope
    pub async fn broadcast_snapshot(&self, snapshot: MarketSnapshot) -> BroadcastReport {
        let message = ServerMessage::market_update(snapshot, self.len());
        self.broadcast(message).await
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}
