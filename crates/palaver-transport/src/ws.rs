//! WebSocket duplex channel implementation.
//!
//! [`connect`] establishes the persistent connection and returns the write
//! handle plus the inbound frame stream. A background task owns the socket:
//! it forwards queued outbound frames, parses inbound text frames into JSON
//! values, and answers protocol pings. Reconnection policy is out of scope;
//! when the peer closes the connection the inbound stream simply ends.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use async_trait::async_trait;
use palaver_core::{Duplex, TransportError, TransportResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Write handle for a connected WebSocket duplex channel.
///
/// Cheap to clone; frames are serialized and queued onto the socket task.
#[derive(Clone)]
pub struct WsDuplex {
    outbound_tx: mpsc::Sender<Vec<u8>>,
}

#[async_trait]
impl Duplex for WsDuplex {
    async fn send(&self, frame: Value) -> TransportResult<()> {
        let bytes = serde_json::to_vec(&frame)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.outbound_tx
            .send(bytes)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

/// Connects to the messaging service's WebSocket endpoint.
///
/// Returns the write handle and the receiver of parsed inbound frames. The
/// socket task runs until `shutdown` is cancelled or the peer closes the
/// connection.
pub async fn connect(
    url: &str,
    shutdown: CancellationToken,
) -> TransportResult<(WsDuplex, mpsc::Receiver<Value>)> {
    info!(url = %url, "Connecting to WebSocket endpoint");

    let (ws_stream, _response) =
        connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
    let (ws_tx, ws_rx) = ws_stream.split();

    let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(256);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Value>(256);

    info!(url = %url, "WebSocket duplex channel established");

    tokio::spawn(run_socket_loop(
        ws_tx,
        ws_rx,
        outbound_rx,
        inbound_tx,
        shutdown,
    ));

    Ok((WsDuplex { outbound_tx }, inbound_rx))
}

async fn run_socket_loop(
    mut ws_tx: WsSink,
    mut ws_rx: WsSource,
    mut outbound_rx: mpsc::Receiver<Vec<u8>>,
    inbound_tx: mpsc::Sender<Value>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("WebSocket duplex channel shutting down");
                let _ = ws_tx.close().await;
                break;
            }

            Some(data) = outbound_rx.recv() => {
                let text = String::from_utf8_lossy(&data).to_string();
                trace!(len = text.len(), "Sending frame");
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    warn!(error = %e, "Failed to send frame");
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        trace!(len = text.len(), "Received text frame");
                        forward_frame(&inbound_tx, text.as_bytes()).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        trace!(len = data.len(), "Received binary frame");
                        forward_frame(&inbound_tx, &data).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        trace!("Received ping, sending pong");
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        trace!("Received pong");
                    }
                    Some(Ok(Message::Close(_))) | Some(Ok(Message::Frame(_))) | None => {
                        info!("WebSocket connection closed by peer");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error, closing");
                        break;
                    }
                }
            }
        }
    }
    // Dropping inbound_tx ends the runtime's read loop.
    debug!("WebSocket socket task finished");
}

async fn forward_frame(inbound_tx: &mpsc::Sender<Value>, data: &[u8]) {
    match serde_json::from_slice::<Value>(data) {
        Ok(frame) => {
            if inbound_tx.send(frame).await.is_err() {
                debug!("Inbound receiver dropped, discarding frame");
            }
        }
        Err(e) => warn!(error = %e, "Discarding non-JSON frame"),
    }
}
