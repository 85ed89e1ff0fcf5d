//! STOMP-over-WebSocket push transport.
//!
//! The Reversi service exposes its broker at a raw WebSocket endpoint
//! (`/ws/game/websocket`). [`WebSocketConnector`] dials that endpoint once per
//! subscription and hands back a [`WebSocketTransport`]; every WebSocket
//! message carries one or more STOMP frames as text.
//!
//! Only available with the `transport-websocket` feature (on by default).
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), reversi_client::ReversiError> {
//! use std::sync::Arc;
//! use reversi_client::realtime::{ChannelManager, Topic};
//! use reversi_client::protocol::GameProgress;
//! use reversi_client::WebSocketConnector;
//!
//! let connector = WebSocketConnector::new("ws://localhost:8080/ws/game/websocket");
//! let channels = ChannelManager::new(Arc::new(connector));
//! let (subscription, mut pushes) = channels
//!     .subscribe::<GameProgress>(Topic::GameProgress("5f0c2a".into()))
//!     .await?;
//! while let Some(progress) = pushes.recv().await {
//!     println!("{:?}", progress.message);
//! }
//! subscription.close().await;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::ReversiError;
use crate::transport::{Connector, Transport};

type BrokerStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// One WebSocket connection to the broker.
///
/// [`recv`](Transport::recv) is cancel-safe: `StreamExt::next` on a
/// tungstenite stream does not lose a message when the future is dropped.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: BrokerStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Dial `url` (`ws://` or `wss://`).
    ///
    /// # Errors
    ///
    /// [`ReversiError::Io`] if the URL is invalid or the handshake fails;
    /// the [`ErrorKind`](std::io::ErrorKind) of an I/O failure is kept.
    pub async fn connect(url: &str) -> Result<Self, ReversiError> {
        tracing::debug!(%url, "dialing broker");
        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            ReversiError::Io(std::io::Error::new(kind, e))
        })?;
        tracing::info!(%url, "broker connection open");
        Ok(Self {
            stream,
            closed: false,
        })
    }

    /// [`connect`](Self::connect), failing with [`ReversiError::Timeout`]
    /// once `timeout` elapses.
    pub async fn connect_with_timeout(url: &str, timeout: Duration) -> Result<Self, ReversiError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| ReversiError::Timeout)?
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), ReversiError> {
        if self.closed {
            return Err(ReversiError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| ReversiError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ReversiError>> {
        while let Some(incoming) = self.stream.next().await {
            match incoming {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                // Some brokers ship STOMP frames as binary messages.
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => tracing::warn!(len = bytes.len(), "skipping non-UTF-8 broker frame"),
                },
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "broker closed the WebSocket");
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(ReversiError::TransportReceive(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<(), ReversiError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.stream
            .close(None)
            .await
            .map_err(|e| ReversiError::TransportSend(e.to_string()))
    }
}

/// Opens a [`WebSocketTransport`] per subscription.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, ReversiError> {
        let transport =
            WebSocketTransport::connect_with_timeout(&self.url, self.connect_timeout).await?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use std::sync::Arc;

    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    use super::*;
    use crate::protocol::{GameProgress, MatchStatusPayload};
    use crate::realtime::{ChannelManager, Topic};
    use crate::stomp::{self, Command, Frame};

    type ServerSocket = WebSocketStream<TcpStream>;

    /// Accept one WebSocket client on a local port and hand it to `broker`.
    async fn serve_once<F, Fut>(broker: F) -> String
    where
        F: FnOnce(ServerSocket) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            broker(ws).await;
        });
        format!("ws://{addr}/ws/game/websocket")
    }

    /// A single-connection STOMP broker: answers `CONNECT`, pushes `body` to
    /// the first subscriber, acknowledges `DISCONNECT`, and reports every
    /// command it saw.
    async fn stomp_broker(body: &'static str, seen: mpsc::UnboundedSender<Command>) -> String {
        serve_once(move |mut ws| async move {
            while let Some(Ok(message)) = ws.next().await {
                let Message::Text(text) = message else {
                    continue;
                };
                for frame in stomp::decode(&text).unwrap() {
                    let _ = seen.send(frame.command);
                    let reply = match frame.command {
                        Command::Connect => Frame::new(Command::Connected).with_header("version", "1.2"),
                        Command::Subscribe => Frame::new(Command::Message)
                            .with_header("subscription", frame.header("id").unwrap_or_default())
                            .with_header("destination", frame.header("destination").unwrap_or_default())
                            .with_body(body),
                        Command::Disconnect => Frame::new(Command::Receipt)
                            .with_header("receipt-id", frame.header("receipt").unwrap_or_default()),
                        _ => continue,
                    };
                    ws.send(Message::Text(reply.encode().into())).await.unwrap();
                }
            }
        })
        .await
    }

    #[tokio::test]
    async fn subscription_runs_over_a_websocket_broker() {
        let (seen_tx, mut seen) = mpsc::unbounded_channel();
        let url = stomp_broker(r#"{"status":"WAITING"}"#, seen_tx).await;

        let channels = ChannelManager::new(Arc::new(WebSocketConnector::new(url)));
        let (subscription, mut pushes) = channels
            .subscribe::<MatchStatusPayload>(Topic::Matchmaking("t1".into()))
            .await
            .unwrap();

        let push = pushes.recv().await.unwrap();
        assert_eq!(push.status.as_deref(), Some("WAITING"));

        subscription.close().await;
        let mut commands = Vec::new();
        while let Ok(command) = seen.try_recv() {
            commands.push(command);
        }
        assert_eq!(
            commands,
            vec![
                Command::Connect,
                Command::Subscribe,
                Command::Unsubscribe,
                Command::Disconnect
            ]
        );
    }

    #[tokio::test]
    async fn binary_frames_are_read_as_stomp_text() {
        let url = serve_once(|mut ws| async move {
            ws.send(Message::Binary(vec![0xC3, 0x28].into())).await.unwrap();
            let connected = Frame::new(Command::Connected).encode();
            ws.send(Message::Binary(connected.into_bytes().into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let text = transport.recv().await.unwrap().unwrap();
        let frames = stomp::decode(&text).unwrap();
        assert_eq!(frames[0].command, Command::Connected);
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn broker_hangup_ends_the_subscription() {
        let url = serve_once(|mut ws| async move {
            // Complete the handshake, then drop the socket.
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                if text.starts_with("SUBSCRIBE") {
                    break;
                }
                let connected = Frame::new(Command::Connected).encode();
                ws.send(Message::Text(connected.into())).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let channels = ChannelManager::new(Arc::new(WebSocketConnector::new(url)));
        let (_subscription, mut pushes) = channels
            .subscribe::<GameProgress>(Topic::GameProgress("g1".into()))
            .await
            .unwrap();
        let ended = tokio::time::timeout(Duration::from_secs(2), pushes.recv()).await;
        assert!(matches!(ended, Ok(None)));
    }

    #[tokio::test]
    async fn closed_transport_rejects_frames() {
        let url = serve_once(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
            .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport
            .send(Frame::disconnect("late").encode())
            .await
            .unwrap_err();
        assert!(matches!(err, ReversiError::TransportClosed));
    }

    #[tokio::test]
    async fn unreachable_broker_is_an_io_error() {
        let connector = WebSocketConnector::new("ws://127.0.0.1:1/ws/game/websocket");
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, ReversiError::Io(_)));
        assert!(matches!(
            WebSocketTransport::connect("not a url").await.unwrap_err(),
            ReversiError::Io(_)
        ));
    }

    #[tokio::test]
    async fn connector_honours_its_timeout() {
        let connector = WebSocketConnector::new("ws://192.0.2.1:1/ws/game/websocket")
            .with_connect_timeout(Duration::from_millis(50));
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, ReversiError::Timeout));
    }
}
