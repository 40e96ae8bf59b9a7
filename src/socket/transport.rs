//! Frame transport underneath the Socket.IO session.
//!
//! A [`Transport`] opens a bidirectional channel of text frames. The
//! connection manager only speaks Engine.IO over it, so tests can swap in an
//! in-memory transport.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

const OUTGOING_BUFFER: usize = 64;
const INCOMING_BUFFER: usize = 256;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Invalid socket URL: {0}")]
    InvalidUrl(String),

    #[error("Transport closed")]
    Closed,
}

/// Both directions of an open transport.
///
/// Dropping `outgoing` closes the transport; `incoming` yields `None` once the
/// remote side has gone away.
pub struct FrameChannel {
    pub outgoing: mpsc::Sender<String>,
    pub incoming: mpsc::Receiver<String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str) -> Result<FrameChannel, TransportError>;
}

/// Build the Engine.IO websocket endpoint from the server base URL and path.
///
/// `http(s)` schemes are rewritten to `ws(s)`.
pub fn engine_url(socket_url: &str, path: &str) -> Result<String, TransportError> {
    let base = socket_url.trim().trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        return Err(TransportError::InvalidUrl(socket_url.to_string()));
    };

    let path = path.trim().trim_end_matches('/');
    let path = if path.is_empty() || path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    Ok(format!("{}{}/?EIO=4&transport=websocket", base, path))
}

/// Websocket transport backed by tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &str) -> Result<FrameChannel, TransportError> {
        let (stream, _response) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| TransportError::Connect {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTGOING_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<String>(INCOMING_BUFFER);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => match outgoing {
                        Some(frame) => {
                            if let Err(e) = sink.send(Message::Text(frame)).await {
                                debug!(error = %e, "Websocket send failed");
                                break;
                            }
                        }
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    incoming = source.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(text).await.is_err() {
                                let _ = sink.send(Message::Close(None)).await;
                                break;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "Websocket closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(error = %e, "Websocket read failed");
                            break;
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(FrameChannel {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use std::time::Duration;

    #[test]
    fn test_engine_url() {
        assert_eq!(
            engine_url("http://localhost:5000", "/socket.io").unwrap(),
            "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            engine_url("https://api.example.com/", "socket.io/").unwrap(),
            "wss://api.example.com/socket.io/?EIO=4&transport=websocket"
        );
        assert!(engine_url("ftp://nope", "/socket.io").is_err());
    }

    async fn echo(ws: WebSocketUpgrade) -> impl IntoResponse {
        ws.on_upgrade(|mut socket: WebSocket| async move {
            let _ = socket
                .send(AxumMessage::Text(r#"0{"sid":"s","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#.to_string()))
                .await;
            while let Some(Ok(msg)) = socket.recv().await {
                if let AxumMessage::Text(text) = msg {
                    if socket.send(AxumMessage::Text(format!("echo:{}", text))).await.is_err() {
                        break;
                    }
                }
            }
        })
    }

    #[tokio::test]
    async fn test_ws_transport_roundtrip() {
        let base = crate::api::testing::serve(Router::new().route("/socket.io/", get(echo))).await;
        let url = engine_url(&base, "/socket.io").unwrap();

        let mut channel = WsTransport.open(&url).await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), channel.incoming.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(first.starts_with("0{"));

        channel.outgoing.send("40/rides,".to_string()).await.unwrap();
        let echoed = tokio::time::timeout(Duration::from_secs(5), channel.incoming.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(echoed, "echo:40/rides,");
    }

    #[tokio::test]
    async fn test_ws_transport_connect_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = engine_url(&format!("http://{}", addr), "/socket.io").unwrap();
        let err = WsTransport.open(&url).await.err().unwrap();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
