//! WebSocket connection handler
//!
//! Handles individual WebSocket connections: greeting, the inbound control
//! protocol, keepalives, and registration with the subscriber registry.

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use tracker_core::{ClientMessage, ErrorCode, ServerMessage, ServerStatus, TransportError};

use crate::aggregator::SnapshotAggregator;
use crate::broadcaster::LastBroadcast;
use crate::registry::{ChannelSink, ClientId, SubscriberRegistry};

/// Per-connection settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Silence after which the server pushes a keepalive
    pub keepalive_timeout: Duration,
    /// Outgoing queue depth before a client counts as backpressured
    pub outbound_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            keepalive_timeout: Duration::from_secs(60),
            outbound_capacity: 100,
        }
    }
}

/// Shared state for WebSocket handlers
#[derive(Clone)]
pub struct WebSocketState {
    pub registry: Arc<SubscriberRegistry>,
    aggregator: Arc<SnapshotAggregator>,
    last_broadcast: LastBroadcast,
    config: ConnectionConfig,
}

impl WebSocketState {
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        aggregator: Arc<SnapshotAggregator>,
        last_broadcast: LastBroadcast,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            registry,
            aggregator,
            last_broadcast,
            config,
        }
    }

    pub fn active_connections(&self) -> usize {
        self.registry.len()
    }

    /// Handle a new WebSocket connection
    ///
    /// Returns once the client disconnects or its transport fails; the
    /// client is unregistered before returning.
    pub async fn handle_connection<S>(&self, socket: S)
    where
        S: futures_util::Stream<
                Item = Result<
                    tokio_tungstenite::tungstenite::Message,
                    tokio_tungstenite::tungstenite::Error,
                >,
            > + futures_util::Sink<
                tokio_tungstenite::tungstenite::Message,
                Error = tokio_tungstenite::tungstenite::Error,
            > + Send
            + 'static,
    {
        let client_id = self.registry.new_client_id();
        info!("New WebSocket connection: {}", client_id);

        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (outgoing_tx, mut outgoing_rx) =
            mpsc::channel::<ServerMessage>(self.config.outbound_capacity);

        // Task: Send outgoing messages to WebSocket
        let send_task = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let json = match serde_json::to_string(&message) {
                    Ok(j) => j,
                    Err(e) => {
                        error!("Failed to serialize {} message: {}", message.kind(), e);
                        continue;
                    }
                };

                if let Err(e) = ws_sender.send(Message::Text(json.into())).await {
                    debug!("WebSocket send failed for {}: {}", client_id, e);
                    return;
                }
            }
            let _ = ws_sender.close().await;
        });

        // Task: Greet, then receive and process incoming messages
        let recv_task = {
            let outgoing_tx = outgoing_tx.clone();
            async move {
                if let Err(e) = self.greet(client_id, &outgoing_tx).await {
                    debug!("Greeting {} failed: {}", client_id, e);
                    return;
                }

                loop {
                    let next = match tokio::time::timeout(
                        self.config.keepalive_timeout,
                        ws_receiver.next(),
                    )
                    .await
                    {
                        Ok(next) => next,
                        Err(_) => {
                            debug!("{} idle, sending keepalive", client_id);
                            if reply(&outgoing_tx, ServerMessage::keepalive()).await.is_err() {
                                break;
                            }
                            continue;
                        }
                    };

                    match next {
                        Some(Ok(Message::Close(_))) => {
                            debug!("Received close from {}", client_id);
                            break;
                        }
                        Some(Ok(msg)) => {
                            if let Err(e) = self.handle_message(client_id, msg, &outgoing_tx).await
                            {
                                debug!("Reply to {} failed: {}", client_id, e);
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            debug!("WebSocket error for {}: {}", client_id, e);
                            break;
                        }
                        None => break,
                    }
                }
            }
        };

        // Wait for either side to finish (connection closed)
        tokio::select! {
            _ = send_task => {}
            _ = recv_task => {}
        }

        self.registry.unregister(client_id);
        info!("WebSocket connection closed: {}", client_id);
    }

    /// `connection_established`, the initial snapshot, then registration
    async fn greet(
        &self,
        client_id: ClientId,
        outgoing_tx: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), TransportError> {
        let server_status = self
            .last_broadcast
            .get()
            .map(|snapshot| ServerStatus::for_snapshot(&snapshot))
            .unwrap_or(ServerStatus::Healthy);

        reply(
            outgoing_tx,
            ServerMessage::ConnectionEstablished {
                client_id: client_id.to_string(),
                server_status,
                timestamp: Utc::now(),
            },
        )
        .await?;

        let initial = match self.aggregator.snapshot().await {
            Ok(snapshot) if !snapshot.is_empty() => ServerMessage::InitialData {
                data: snapshot,
                client_id: client_id.to_string(),
                timestamp: Utc::now(),
            },
            Ok(_) => ServerMessage::error(ErrorCode::DataUnavailable, "No market data available"),
            Err(e) => {
                error!("Failed to build initial data for {}: {}", client_id, e);
                ServerMessage::error(ErrorCode::InternalError, "Failed to fetch initial data")
            }
        };
        reply(outgoing_tx, initial).await?;

        // Broadcasts can only land behind the initial snapshot
        self.registry
            .register(client_id, Arc::new(ChannelSink::new(outgoing_tx.clone())));
        Ok(())
    }

    /// Handle an incoming WebSocket message
    async fn handle_message(
        &self,
        client_id: ClientId,
        msg: Message,
        outgoing_tx: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), TransportError> {
        match msg {
            Message::Text(text) => match ClientMessage::parse(text.as_str()) {
                Ok(Some(ClientMessage::Ping)) => {
                    reply(
                        outgoing_tx,
                        ServerMessage::Pong {
                            client_id: client_id.to_string(),
                            timestamp: Utc::now(),
                        },
                    )
                    .await
                }
                Ok(Some(ClientMessage::RequestData)) => {
                    let response = match self.aggregator.snapshot().await {
                        Ok(snapshot) if !snapshot.is_empty() => {
                            ServerMessage::requested_update(snapshot, client_id.to_string())
                        }
                        Ok(_) => ServerMessage::error(
                            ErrorCode::DataUnavailable,
                            "No market data available",
                        ),
                        Err(e) => {
                            error!("Requested snapshot for {} failed: {}", client_id, e);
                            ServerMessage::error(
                                ErrorCode::InternalError,
                                "Failed to fetch market data",
                            )
                        }
                    };
                    reply(outgoing_tx, response).await
                }
                Ok(Some(ClientMessage::Subscribe { symbols })) => {
                    let symbols = symbols.unwrap_or_else(|| vec!["all".to_string()]);
                    debug!("{} subscribed to {:?}", client_id, symbols);
                    reply(
                        outgoing_tx,
                        ServerMessage::SubscriptionConfirmed {
                            symbols,
                            timestamp: Utc::now(),
                        },
                    )
                    .await
                }
                Ok(None) => {
                    debug!("Ignoring unrecognized message from {}", client_id);
                    Ok(())
                }
                Err(e) => {
                    warn!("Malformed message from {}: {}", client_id, e);
                    reply(
                        outgoing_tx,
                        ServerMessage::error(ErrorCode::InvalidMessage, "Invalid JSON format"),
                    )
                    .await
                }
            },
            Message::Binary(_) => {
                reply(
                    outgoing_tx,
                    ServerMessage::error(
                        ErrorCode::InvalidMessage,
                        "Binary messages not supported",
                    ),
                )
                .await
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Control frames are answered by the transport
                debug!("Received control frame from {}", client_id);
                Ok(())
            }
            Message::Close(_) | Message::Frame(_) => Ok(()),
        }
    }
}

/// Queue a message on this connection's outgoing channel
async fn reply(
    outgoing_tx: &mpsc::Sender<ServerMessage>,
    message: ServerMessage,
) -> Result<(), TransportError> {
    outgoing_tx
        .send(message)
        .await
        .map_err(|_| TransportError::Closed)
}
