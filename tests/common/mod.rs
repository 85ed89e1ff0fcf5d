#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for Reversi Client integration tests.
//!
//! Provides a scripted [`ScriptedBackend`], an in-process STOMP
//! [`Broker`], a [`RecordingNavigator`], and helpers for building service
//! JSON bodies.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use reversi_client::stomp::{self, Command, Frame};
use reversi_client::{
    ClientEvent, Collaborators, Connector, HttpBackend, HttpRequest, HttpResponse, MemoryStorage,
    Navigator, ReversiClient, ReversiConfig, ReversiError, Transport,
};
use tokio::sync::{mpsc, Notify};

/// How long helpers wait for something asynchronous before failing.
pub const WAIT: Duration = Duration::from_secs(2);

// ── ScriptedBackend ─────────────────────────────────────────────────

/// An [`HttpBackend`] answering from per-path scripts.
///
/// Each path holds a queue of responses; the last one repeats once the
/// queue is down to a single entry. Unscripted paths answer 404. A gated
/// path waits for one [`release`](Self::release) per call.
#[derive(Default)]
pub struct ScriptedBackend {
    routes: StdMutex<HashMap<String, VecDeque<HttpResponse>>>,
    gates: StdMutex<HashMap<String, Arc<Notify>>>,
    requests: StdMutex<Vec<HttpRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue `response` for `path`.
    pub fn route(&self, path: &str, response: HttpResponse) {
        self.routes
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    /// Queue a 200 with `body` for `path`.
    pub fn ok(&self, path: &str, body: impl Into<String>) {
        self.route(path, HttpResponse::new(200, body));
    }

    /// Hold calls to `path` until released.
    pub fn gate(&self, path: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(path.to_string(), Arc::new(Notify::new()));
    }

    /// Let one held (or future) call to `path` through.
    pub fn release(&self, path: &str) {
        if let Some(gate) = self.gates.lock().unwrap().get(path) {
            gate.notify_one();
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }

    /// Wait until `path` has been called at least `n` times.
    pub async fn wait_for_calls(&self, path: &str, n: usize) {
        tokio::time::timeout(WAIT, async {
            while self.calls(path) < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {n} call(s) to {path}"));
    }

    fn next_response(&self, path: &str) -> HttpResponse {
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| HttpResponse::new(404, "")),
            None => HttpResponse::new(404, ""),
        }
    }
}

#[async_trait]
impl HttpBackend for ScriptedBackend {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ReversiError> {
        let path = request.path.clone();
        self.requests.lock().unwrap().push(request);
        let gate = self.gates.lock().unwrap().get(&path).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self.next_response(&path))
    }
}

// ── Broker ──────────────────────────────────────────────────────────

struct Subscriber {
    destination: String,
    id: String,
    tx: mpsc::UnboundedSender<String>,
    severed: Arc<Notify>,
}

#[derive(Default)]
struct BrokerInner {
    subscribers: StdMutex<Vec<Subscriber>>,
    subscribed: StdMutex<HashMap<String, usize>>,
    connections: AtomicUsize,
    refusing: AtomicBool,
}

/// An in-process STOMP broker. Each [`Connector::connect`] opens a fresh
/// connection that answers `CONNECT` and `DISCONNECT` the way a real broker
/// does.
///
/// [`refuse_connections`](Self::refuse_connections) makes new connections
/// fail, and [`sever`](Self::sever) closes live ones from the broker side.
#[derive(Clone, Default)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `body` to everyone subscribed to `destination`. Returns the
    /// number of subscribers reached.
    pub fn publish(&self, destination: &str, body: &str) -> usize {
        let subscribers = self.inner.subscribers.lock().unwrap();
        let mut reached = 0;
        for sub in subscribers.iter().filter(|s| s.destination == destination) {
            let frame = Frame::new(Command::Message)
                .with_header("subscription", sub.id.as_str())
                .with_header("destination", destination)
                .with_header("content-type", "application/json")
                .with_body(body);
            if sub.tx.send(frame.encode()).is_ok() {
                reached += 1;
            }
        }
        reached
    }

    /// Total `SUBSCRIBE` frames ever received for `destination`.
    pub fn subscribe_count(&self, destination: &str) -> usize {
        self.inner
            .subscribed
            .lock()
            .unwrap()
            .get(destination)
            .copied()
            .unwrap_or(0)
    }

    /// Subscriptions to `destination` not yet unsubscribed.
    pub fn active(&self, destination: &str) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.destination == destination)
            .count()
    }

    /// Connection attempts, refused ones included.
    pub fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::SeqCst)
    }

    /// While set, every [`Connector::connect`] fails.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refusing.store(refuse, Ordering::SeqCst);
    }

    /// Close every connection subscribed to `destination` from the broker
    /// side. Returns the number of subscriptions cut.
    pub fn sever(&self, destination: &str) -> usize {
        let mut subscribers = self.inner.subscribers.lock().unwrap();
        let mut cut = 0;
        subscribers.retain(|s| {
            if s.destination == destination {
                s.severed.notify_one();
                cut += 1;
                false
            } else {
                true
            }
        });
        cut
    }

    /// Wait until someone is subscribed to `destination`.
    pub async fn wait_for_subscriber(&self, destination: &str) {
        tokio::time::timeout(WAIT, async {
            while self.active(destination) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for a subscriber on {destination}"));
    }

    /// Wait until nobody is subscribed to `destination`.
    pub async fn wait_for_no_subscriber(&self, destination: &str) {
        tokio::time::timeout(WAIT, async {
            while self.active(destination) > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{destination} still has subscribers"));
    }
}

#[async_trait]
impl Connector for Broker {
    async fn connect(&self) -> Result<Box<dyn Transport>, ReversiError> {
        self.inner.connections.fetch_add(1, Ordering::SeqCst);
        if self.inner.refusing.load(Ordering::SeqCst) {
            return Err(ReversiError::Network("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Box::new(BrokerConnection {
            inner: Arc::clone(&self.inner),
            tx,
            rx,
            severed: Arc::new(Notify::new()),
        }))
    }
}

struct BrokerConnection {
    inner: Arc<BrokerInner>,
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
    severed: Arc<Notify>,
}

impl BrokerConnection {
    fn reply(&self, frame: Frame) {
        let _ = self.tx.send(frame.encode());
    }

    fn drop_subscriptions(&self) {
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .retain(|s| !s.tx.same_channel(&self.tx));
    }
}

#[async_trait]
impl Transport for BrokerConnection {
    async fn send(&mut self, message: String) -> Result<(), ReversiError> {
        for frame in stomp::decode(&message)? {
            match frame.command {
                Command::Connect => {
                    self.reply(Frame::new(Command::Connected).with_header("version", "1.2"));
                }
                Command::Subscribe => {
                    let destination = frame.header("destination").unwrap_or_default().to_string();
                    let id = frame.header("id").unwrap_or_default().to_string();
                    *self
                        .inner
                        .subscribed
                        .lock()
                        .unwrap()
                        .entry(destination.clone())
                        .or_default() += 1;
                    self.inner.subscribers.lock().unwrap().push(Subscriber {
                        destination,
                        id,
                        tx: self.tx.clone(),
                        severed: Arc::clone(&self.severed),
                    });
                }
                Command::Unsubscribe => {
                    let id = frame.header("id").unwrap_or_default().to_string();
                    self.inner
                        .subscribers
                        .lock()
                        .unwrap()
                        .retain(|s| !(s.id == id && s.tx.same_channel(&self.tx)));
                }
                Command::Disconnect => {
                    self.drop_subscriptions();
                    if let Some(receipt) = frame.header("receipt") {
                        self.reply(Frame::new(Command::Receipt).with_header("receipt-id", receipt));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, ReversiError>> {
        tokio::select! {
            message = self.rx.recv() => message.map(Ok),
            () = self.severed.notified() => None,
        }
    }

    async fn close(&mut self) -> Result<(), ReversiError> {
        self.drop_subscriptions();
        Ok(())
    }
}

impl Drop for BrokerConnection {
    fn drop(&mut self) {
        self.drop_subscriptions();
    }
}

// ── Navigator ───────────────────────────────────────────────────────

/// Records every navigation instead of performing it.
pub struct RecordingNavigator {
    location: String,
    pub visited: StdMutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn at(location: &str) -> Arc<Self> {
        Arc::new(Self {
            location: location.to_string(),
            visited: StdMutex::new(Vec::new()),
        })
    }

    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn current_location(&self) -> String {
        self.location.clone()
    }

    fn navigate(&self, url: &str) {
        self.visited.lock().unwrap().push(url.to_string());
    }
}

// ── Harness ─────────────────────────────────────────────────────────

/// All the fakes one client needs, kept around for inspection.
pub struct Harness {
    pub backend: Arc<ScriptedBackend>,
    pub broker: Broker,
    pub storage: Arc<MemoryStorage>,
    pub navigator: Arc<RecordingNavigator>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            backend: ScriptedBackend::new(),
            broker: Broker::new(),
            storage: Arc::new(MemoryStorage::new()),
            navigator: RecordingNavigator::at("/play"),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(
            self.backend.clone(),
            Arc::new(self.broker.clone()),
            self.storage.clone(),
            self.navigator.clone(),
        )
    }

    pub fn start(&self, config: ReversiConfig) -> (ReversiClient, mpsc::Receiver<ClientEvent>) {
        ReversiClient::start(self.collaborators(), config)
    }
}

/// Receive the next event, failing the test if none arrives in time.
pub async fn next_event(rx: &mut mpsc::Receiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Receive events until one matches `pred`, returning it.
pub async fn wait_for<F>(rx: &mut mpsc::Receiver<ClientEvent>, mut pred: F) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    loop {
        let event = next_event(rx).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Every event already queued, without waiting.
pub fn drain(rx: &mut mpsc::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ── JSON builders ───────────────────────────────────────────────────

pub const SESSIONS: &str = "/api/v1/sessions";
pub const ENQUEUE: &str = "/api/matchmaking/enqueue";
pub const AUTH_CHECK: &str = "/api/matchmaking/auth-check";

pub fn join_path(session_id: &str) -> String {
    format!("{SESSIONS}/{session_id}/join")
}

pub fn moves_path(session_id: &str) -> String {
    format!("{SESSIONS}/{session_id}/moves")
}

pub fn possible_moves_path(session_id: &str) -> String {
    format!("{SESSIONS}/{session_id}/possible-moves")
}

pub fn status_path(ticket_id: &str) -> String {
    format!("/api/matchmaking/{ticket_id}")
}

pub fn cancel_path(ticket_id: &str) -> String {
    format!("/api/matchmaking/cancel/{ticket_id}")
}

pub fn game_topic(session_id: &str) -> String {
    format!("/topic/game-progress/{session_id}")
}

pub fn match_topic(ticket_id: &str) -> String {
    format!("/topic/matchmaking/{ticket_id}")
}

/// The standard Reversi opening position.
pub fn opening_cells() -> Vec<Vec<&'static str>> {
    let mut rows = vec![vec![""; 8]; 8];
    rows[3][3] = "W";
    rows[3][4] = "B";
    rows[4][3] = "B";
    rows[4][4] = "W";
    rows
}

/// Session summary JSON on the opening board.
pub fn session_json(session_id: &str, turn: &str, state: &str) -> serde_json::Value {
    serde_json::json!({
        "sessionId": session_id,
        "board": {"boardCells": opening_cells()},
        "blackScore": 2,
        "whiteScore": 2,
        "currentPlayerColor": turn,
        "gameState": state,
        "gameType": "PLAYER_VS_PLAYER",
        "playerColors": ["WHITE", "BLACK"],
        "playerNicknames": ["alice", "bob"]
    })
}

pub fn session_body(session_id: &str, turn: &str, state: &str) -> String {
    session_json(session_id, turn, state).to_string()
}

/// Body of a `game-progress` push.
pub fn progress_body(session_id: &str, turn: &str, state: &str) -> String {
    serde_json::json!({
        "message": "update",
        "sessionSummary": session_json(session_id, turn, state)
    })
    .to_string()
}

pub fn found_body(session_id: &str, color: &str) -> String {
    serde_json::json!({
        "status": "FOUND",
        "assignedColor": color,
        "gameSession": session_json(session_id, "BLACK", "IN_PROGRESS")
    })
    .to_string()
}

pub fn status_body(status: &str) -> String {
    serde_json::json!({ "status": status }).to_string()
}
