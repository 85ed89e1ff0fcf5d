//! Push-channel subscriptions over STOMP.
//!
//! [`ChannelManager::subscribe`] opens a fresh broker connection through the
//! [`Connector`], performs the `CONNECT`/`CONNECTED` handshake, subscribes to
//! one [`Topic`], and spawns a task that decodes every `MESSAGE` body as JSON
//! and forwards it on an mpsc channel. The receiver yields `None` once the
//! subscription has ended for any reason, which is how callers learn the
//! channel dropped.
//!
//! Bodies that fail to decode are logged and skipped; they never end the
//! subscription.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{ReversiError, Result};
use crate::stomp::{self, Command, Frame};
use crate::transport::{Connector, Transport};

/// Default time allowed for the STOMP handshake and for a graceful teardown.
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Buffered pushes per subscription.
const SUBSCRIPTION_BUFFER: usize = 64;

/// A push destination on the broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// State pushes for one game session.
    GameProgress(String),
    /// Status pushes for one matchmaking ticket.
    Matchmaking(String),
}

impl Topic {
    pub fn destination(&self) -> String {
        match self {
            Self::GameProgress(id) => format!("/topic/game-progress/{id}"),
            Self::Matchmaking(ticket) => format!("/topic/matchmaking/{ticket}"),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.destination())
    }
}

/// Opens [`Subscription`]s against the broker.
pub struct ChannelManager {
    connector: Arc<dyn Connector>,
    host: String,
    teardown_timeout: Duration,
    next_id: AtomicU64,
}

impl ChannelManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            host: "/".to_string(),
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
            next_id: AtomicU64::new(0),
        }
    }

    /// Value of the `host` header sent with `CONNECT`.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    /// Subscribe to `topic`, decoding each pushed body as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ReversiError::Channel`] if the connection, handshake, or
    /// `SUBSCRIBE` fails.
    pub async fn subscribe<T>(&self, topic: Topic) -> Result<(Subscription, mpsc::Receiver<T>)>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let channel_err = |e: ReversiError| ReversiError::Channel(format!("{topic}: {e}"));

        let mut transport = self.connector.connect().await.map_err(channel_err)?;
        transport
            .send(Frame::connect(&self.host).encode())
            .await
            .map_err(channel_err)?;
        tokio::time::timeout(self.teardown_timeout, await_connected(transport.as_mut()))
            .await
            .map_err(|_| channel_err(ReversiError::Timeout))?
            .map_err(channel_err)?;

        let id = format!("sub-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        transport
            .send(Frame::subscribe(&id, &topic.destination()).encode())
            .await
            .map_err(channel_err)?;
        info!(%topic, subscription = %id, "subscribed");

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (close_tx, close_rx) = oneshot::channel();
        let task = tokio::spawn(subscription_loop(
            transport,
            id,
            topic.clone(),
            tx,
            close_rx,
            self.teardown_timeout,
        ));

        Ok((
            Subscription {
                topic,
                close_tx: Some(close_tx),
                task: Some(task),
                teardown_timeout: self.teardown_timeout,
            },
            rx,
        ))
    }
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("host", &self.host)
            .field("teardown_timeout", &self.teardown_timeout)
            .finish_non_exhaustive()
    }
}

/// A live subscription. Dropping it aborts the subscription task without
/// the graceful `UNSUBSCRIBE`/`DISCONNECT` exchange; call
/// [`close`](Self::close) for that.
#[derive(Debug)]
pub struct Subscription {
    topic: Topic,
    close_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    teardown_timeout: Duration,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Unsubscribe and disconnect, best-effort.
    ///
    /// Waits for the subscription task to finish its teardown; if it does
    /// not finish within twice the teardown timeout the task is aborted.
    pub async fn close(mut self) {
        debug!(topic = %self.topic, "closing subscription");
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.teardown_timeout * 2, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!(topic = %self.topic, "subscription task terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!(topic = %self.topic, "subscription teardown timed out; aborting task");
                    task.abort();
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Read until `CONNECTED`. An `ERROR` frame or a closed transport fails the handshake.
async fn await_connected(transport: &mut dyn Transport) -> Result<()> {
    loop {
        let text = match transport.recv().await {
            Some(Ok(text)) => text,
            Some(Err(e)) => return Err(e),
            None => return Err(ReversiError::TransportClosed),
        };
        for frame in stomp::decode(&text)? {
            match frame.command {
                Command::Connected => {
                    trace!(version = ?frame.header("version"), "STOMP connected");
                    return Ok(());
                }
                Command::Error => {
                    return Err(ReversiError::Channel(broker_error_text(&frame)));
                }
                other => trace!(command = %other, "ignoring frame before CONNECTED"),
            }
        }
    }
}

fn broker_error_text(frame: &Frame) -> String {
    match frame.header("message") {
        Some(message) if !message.is_empty() => format!("broker error: {message}"),
        _ => format!("broker error: {}", frame.body.trim()),
    }
}

// ── Subscription loop ───────────────────────────────────────────────

enum LoopExit {
    /// Close requested or receiver dropped: run the teardown.
    Teardown,
    /// The transport is gone or the broker refused us.
    Ended,
}

async fn subscription_loop<T>(
    mut transport: Box<dyn Transport>,
    id: String,
    topic: Topic,
    tx: mpsc::Sender<T>,
    mut close_rx: oneshot::Receiver<()>,
    teardown_timeout: Duration,
) where
    T: DeserializeOwned + Send + 'static,
{
    let exit = loop {
        tokio::select! {
            biased;

            _ = &mut close_rx => break LoopExit::Teardown,

            incoming = transport.recv() => {
                let text = match incoming {
                    Some(Ok(text)) => text,
                    Some(Err(e)) => {
                        warn!(%topic, "push channel receive error: {e}");
                        break LoopExit::Ended;
                    }
                    None => {
                        warn!(%topic, "push channel closed by broker");
                        break LoopExit::Ended;
                    }
                };
                match forward_frames(&text, &id, &topic, &tx).await {
                    Ok(true) => {}
                    Ok(false) => break LoopExit::Teardown,
                    Err(e) => {
                        warn!(%topic, "{e}");
                        break LoopExit::Ended;
                    }
                }
            }
        }
    };

    if let LoopExit::Teardown = exit {
        teardown(transport.as_mut(), &id, &topic, teardown_timeout).await;
    }
    debug!(%topic, "subscription loop exited");
}

/// Deliver every `MESSAGE` in `text`. Returns `Ok(false)` once the receiver
/// has gone away, and an error when the broker sent `ERROR`.
async fn forward_frames<T>(
    text: &str,
    id: &str,
    topic: &Topic,
    tx: &mpsc::Sender<T>,
) -> Result<bool>
where
    T: DeserializeOwned,
{
    let frames = match stomp::decode(text) {
        Ok(frames) => frames,
        Err(e) => {
            warn!(%topic, "skipping undecodable push: {e}");
            return Ok(true);
        }
    };
    for frame in frames {
        match frame.command {
            Command::Message => {
                if frame.header("subscription").is_some_and(|s| s != id) {
                    trace!(%topic, "ignoring message for another subscription");
                    continue;
                }
                match serde_json::from_str::<T>(&frame.body) {
                    Ok(value) => {
                        if tx.send(value).await.is_err() {
                            debug!(%topic, "push receiver dropped");
                            return Ok(false);
                        }
                    }
                    Err(e) => warn!(%topic, "skipping push with unreadable body: {e}"),
                }
            }
            Command::Error => return Err(ReversiError::Channel(broker_error_text(&frame))),
            other => trace!(%topic, command = %other, "ignoring frame"),
        }
    }
    Ok(true)
}

async fn teardown(transport: &mut dyn Transport, id: &str, topic: &Topic, timeout: Duration) {
    let receipt = format!("{id}-disconnect");
    let graceful = async {
        transport.send(Frame::unsubscribe(id).encode()).await?;
        transport.send(Frame::disconnect(&receipt).encode()).await?;
        while let Some(incoming) = transport.recv().await {
            let text = incoming?;
            let acknowledged = stomp::decode(&text)?.iter().any(|f| {
                f.command == Command::Receipt && f.header("receipt-id") == Some(receipt.as_str())
            });
            if acknowledged {
                break;
            }
        }
        Ok::<(), ReversiError>(())
    };
    match tokio::time::timeout(timeout, graceful).await {
        Ok(Ok(())) => debug!(%topic, "unsubscribed"),
        Ok(Err(e)) => debug!(%topic, "unsubscribe incomplete: {e}"),
        Err(_) => debug!(%topic, "no DISCONNECT receipt before timeout"),
    }
    if let Err(e) = transport.close().await {
        debug!(%topic, "transport close failed: {e}");
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
    use super::*;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::sync::Mutex as StdMutex;

    /// Broker side of an in-process connection.
    struct BrokerEnd {
        to_client: mpsc::UnboundedSender<String>,
        from_client: mpsc::UnboundedReceiver<String>,
    }

    struct ChannelTransport {
        incoming: mpsc::UnboundedReceiver<String>,
        outgoing: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn send(&mut self, message: String) -> Result<()> {
            self.outgoing
                .send(message)
                .map_err(|_| ReversiError::TransportClosed)
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            self.incoming.recv().await.map(Ok)
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct PairConnector {
        brokers: StdMutex<Vec<BrokerEnd>>,
    }

    #[async_trait]
    impl Connector for PairConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>> {
            let (to_client, incoming) = mpsc::unbounded_channel();
            let (outgoing, from_client) = mpsc::unbounded_channel();
            // Answer CONNECT up front.
            to_client
                .send("CONNECTED\nversion:1.2\n\n\0".to_string())
                .unwrap();
            self.brokers.lock().unwrap().push(BrokerEnd {
                to_client,
                from_client,
            });
            Ok(Box::new(ChannelTransport { incoming, outgoing }))
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Ping {
        n: u32,
    }

    fn message(sub: &str, body: &str) -> String {
        Frame::new(Command::Message)
            .with_header("subscription", sub)
            .with_header("destination", "/topic/x")
            .with_body(body)
            .encode()
    }

    #[test]
    fn topic_destinations() {
        assert_eq!(
            Topic::GameProgress("g1".into()).destination(),
            "/topic/game-progress/g1"
        );
        assert_eq!(
            Topic::Matchmaking("t9".into()).destination(),
            "/topic/matchmaking/t9"
        );
    }

    #[tokio::test]
    async fn forwards_decoded_messages_and_skips_bad_bodies() {
        let connector = Arc::new(PairConnector::default());
        let manager = ChannelManager::new(connector.clone());
        let (sub, mut rx) = manager
            .subscribe::<Ping>(Topic::GameProgress("g1".into()))
            .await
            .unwrap();

        let mut broker = connector.brokers.lock().unwrap().pop().unwrap();
        let connect = broker.from_client.recv().await.unwrap();
        assert!(connect.starts_with("CONNECT\n"));
        let subscribe = broker.from_client.recv().await.unwrap();
        let frame = stomp::decode(&subscribe).unwrap().remove(0);
        assert_eq!(frame.header("destination"), Some("/topic/game-progress/g1"));

        broker.to_client.send(message("sub-0", "not json")).unwrap();
        broker
            .to_client
            .send(format!(
                "{}\n{}",
                message("sub-0", r#"{"n":1}"#),
                message("sub-0", r#"{"n":2}"#)
            ))
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), Ping { n: 1 });
        assert_eq!(rx.recv().await.unwrap(), Ping { n: 2 });

        sub.close().await;
        let unsubscribe = broker.from_client.recv().await.unwrap();
        assert!(unsubscribe.starts_with("UNSUBSCRIBE\n"));
        let disconnect = broker.from_client.recv().await.unwrap();
        assert!(disconnect.starts_with("DISCONNECT\n"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn broker_close_ends_the_receiver() {
        let connector = Arc::new(PairConnector::default());
        let manager = ChannelManager::new(connector.clone());
        let (_sub, mut rx) = manager
            .subscribe::<Ping>(Topic::Matchmaking("t1".into()))
            .await
            .unwrap();
        // Dropping the broker end closes the client's incoming stream.
        connector.brokers.lock().unwrap().clear();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn broker_error_during_handshake_fails_subscribe() {
        #[derive(Default)]
        struct RefusingConnector {
            sinks: StdMutex<Vec<mpsc::UnboundedReceiver<String>>>,
        }

        #[async_trait]
        impl Connector for RefusingConnector {
            async fn connect(&self) -> Result<Box<dyn Transport>> {
                let (to_client, incoming) = mpsc::unbounded_channel();
                let (outgoing, from_client) = mpsc::unbounded_channel();
                to_client
                    .send("ERROR\nmessage:not allowed\n\n\0".to_string())
                    .unwrap();
                self.sinks.lock().unwrap().push(from_client);
                Ok(Box::new(ChannelTransport { incoming, outgoing }))
            }
        }

        let manager = ChannelManager::new(Arc::new(RefusingConnector::default()));
        let err = manager
            .subscribe::<Ping>(Topic::Matchmaking("t1".into()))
            .await
            .unwrap_err();
        assert!(err.is_channel_failure());
        assert!(err.to_string().contains("not allowed"));
    }
}
