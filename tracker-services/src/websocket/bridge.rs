//! Channel-backed socket
//!
//! Adapts a pair of channels to the `Stream + Sink` of tungstenite messages
//! that [`WebSocketState::handle_connection`](super::WebSocketState) expects.
//! The HTTP layer pumps frames between its own WebSocket type and the
//! [`SocketPeer`]; tests drive the peer directly.

use futures_util::{Sink, Stream};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error, Message};
use tokio_util::sync::PollSender;

/// Handler-facing end of the bridge
pub struct ChannelSocket {
    inbound: mpsc::Receiver<Message>,
    outbound: PollSender<Message>,
}

/// Transport-facing end of the bridge
pub struct SocketPeer {
    /// Frames received from the remote client
    pub inbound: mpsc::Sender<Message>,
    /// Frames the handler wants delivered to the remote client
    pub outbound: mpsc::Receiver<Message>,
}

impl ChannelSocket {
    /// Create a connected socket/peer pair
    ///
    /// Both directions hold at most `capacity` frames. Once the peer stops
    /// draining `outbound`, sends on the socket wait for room.
    pub fn pair(capacity: usize) -> (ChannelSocket, SocketPeer) {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        (
            ChannelSocket {
                inbound: inbound_rx,
                outbound: PollSender::new(outbound_tx),
            },
            SocketPeer {
                inbound: inbound_tx,
                outbound: outbound_rx,
            },
        )
    }
}

impl Stream for ChannelSocket {
    type Item = Result<Message, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inbound.poll_recv(cx).map(|msg| msg.map(Ok))
    }
}

impl Sink<Message> for ChannelSocket {
    type Error = Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.outbound
            .poll_reserve(cx)
            .map_err(|_| Error::ConnectionClosed)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        self.outbound
            .send_item(item)
            .map_err(|_| Error::ConnectionClosed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.outbound.close();
        Poll::Ready(Ok(()))
    }
}
