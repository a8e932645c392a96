//! WebSocket route handler
//!
//! Handles the WebSocket upgrade and bridges axum frames into the
//! tungstenite-based connection handler.

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use tracing::{debug, info};
use tracker_services::{ChannelSocket, SocketPeer};

use crate::AppState;

/// Frames buffered in each direction between axum and the handler
const SOCKET_BUFFER: usize = 32;

/// Create WebSocket routes
pub fn routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (bridge, peer) = ChannelSocket::pair(SOCKET_BUFFER);
    let SocketPeer {
        inbound,
        mut outbound,
    } = peer;

    // Task: Forward frames from the axum receiver into the bridge
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let frame = match msg {
                Message::Text(text) => tungstenite::Message::Text(text.to_string().into()),
                Message::Binary(data) => tungstenite::Message::Binary(data.to_vec().into()),
                Message::Ping(data) => tungstenite::Message::Ping(data.to_vec().into()),
                Message::Pong(data) => tungstenite::Message::Pong(data.to_vec().into()),
                Message::Close(_) => {
                    debug!("Client sent close frame");
                    break;
                }
            };

            if inbound.send(frame).await.is_err() {
                break;
            }
        }
    });

    // Task: Forward frames written by the handler to the axum sender
    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let msg = match frame {
                tungstenite::Message::Text(text) => Message::Text(text.to_string().into()),
                tungstenite::Message::Binary(data) => Message::Binary(Bytes::from(data.to_vec())),
                tungstenite::Message::Ping(data) => Message::Ping(Bytes::from(data.to_vec())),
                tungstenite::Message::Pong(data) => Message::Pong(Bytes::from(data.to_vec())),
                tungstenite::Message::Close(_) => break,
                tungstenite::Message::Frame(_) => continue,
            };

            if sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    state.ws_state.handle_connection(bridge).await;

    // Inbound side is done; outbound drains once the handler drops the bridge
    recv_task.abort();
    let _ = send_task.await;
}
