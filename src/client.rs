//! Async client for the Reversi game and matchmaking service.
//!
//! [`ReversiClient`] is a thin handle that communicates with a background
//! session loop task via an unbounded MPSC channel. Events are emitted on a
//! bounded channel ([`tokio::sync::mpsc::Receiver<ClientEvent>`]) returned
//! from [`ReversiClient::start`].
//!
//! The session loop is the only writer of game and matchmaking state. It
//! replays any pending intent first, then multiplexes user commands, the
//! completions of spawned fetches, and the two push subscriptions.
//!
//! # Example
//!
//! ```rust,ignore
//! let collaborators = Collaborators::new(
//!     Arc::new(ReqwestBackend::new("http://localhost:8080")?),
//!     Arc::new(WebSocketConnector::new("ws://localhost:8080/ws/game/websocket")),
//!     Arc::new(FileStorage::new(".reversi")),
//!     Arc::new(my_navigator),
//! );
//! let (client, mut events) = ReversiClient::start(collaborators, ReversiConfig::new());
//!
//! client.find_match(None)?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ClientEvent::Rendered { view } => draw(&view),
//!         ClientEvent::GameOver { outcome, .. } => announce(&outcome),
//!         ClientEvent::Stopped => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use crate::api::{ApiPaths, GameApi};
use crate::error::{ReversiError, Result};
use crate::event::ClientEvent;
use crate::gateway::{AuthGateway, Navigator, DEFAULT_LOGIN_PATH};
use crate::http::HttpBackend;
use crate::intent::{IntentStorage, PendingIntent, PendingIntentStore};
use crate::matchmaking::{MatchTransition, Matchmaker};
use crate::protocol::{
    GameProgress, GameType, MatchStatusPayload, MatchUpdate, Move, MoveRequest, PlayerColor,
};
use crate::realtime::{ChannelManager, Subscription, Topic, DEFAULT_TEARDOWN_TIMEOUT};
use crate::snapshot::SessionSnapshot;
use crate::transport::Connector;
use crate::turn::{LegalMovesRequest, PassPolicy, TurnResolution, TurnSynchronizer};
use crate::view_model::SessionViewModel;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Shown when enqueueing fails for any reason other than a login redirect.
const MATCHMAKING_RETRY_MESSAGE: &str = "Could not start matchmaking. Please try again.";

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`ReversiClient`].
///
/// # Example
///
/// ```
/// use reversi_client::client::ReversiConfig;
/// use reversi_client::turn::PassPolicy;
/// use std::time::Duration;
///
/// let config = ReversiConfig::new()
///     .with_pass_policy(PassPolicy::AutoPass)
///     .with_shutdown_timeout(Duration::from_secs(5));
/// assert_eq!(config.login_path, "/login");
/// assert_eq!(config.event_channel_capacity, 256);
/// ```
#[derive(Debug, Clone)]
pub struct ReversiConfig {
    /// Prepended to every service path. Defaults to empty.
    pub api_prefix: String,
    /// Path of the login surface; also used to recognise login redirects.
    /// Defaults to `/login`.
    pub login_path: String,
    /// Behaviour when the local player has no legal move.
    /// Defaults to [`PassPolicy::AwaitPush`].
    pub pass_policy: PassPolicy,
    /// Color requested when creating a session. The joiner plays the
    /// opposite color. Defaults to white.
    pub creator_color: PlayerColor,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, progress events are dropped (with a
    /// warning logged) to avoid blocking the session loop. Terminal events
    /// ([`ClientEvent::GameOver`], the end of a matchmaking ticket, and the
    /// final [`ClientEvent::Stopped`]) wait for room instead.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time [`ReversiClient::shutdown`] waits for the session loop before
    /// aborting it. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Time allowed for a push-channel handshake and for each graceful
    /// unsubscribe. Defaults to **1 second**.
    pub channel_teardown_timeout: Duration,
}

impl Default for ReversiConfig {
    fn default() -> Self {
        Self {
            api_prefix: String::new(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            pass_policy: PassPolicy::default(),
            creator_color: PlayerColor::White,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            channel_teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
        }
    }
}

impl ReversiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    #[must_use]
    pub fn with_pass_policy(mut self, policy: PassPolicy) -> Self {
        self.pass_policy = policy;
        self
    }

    #[must_use]
    pub fn with_creator_color(mut self, color: PlayerColor) -> Self {
        self.creator_color = color;
        self
    }

    /// Set the capacity of the bounded event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    ///
    /// A zero timeout aborts the session loop immediately.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_channel_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.channel_teardown_timeout = timeout;
        self
    }
}

/// The pluggable outside world: HTTP, push connections, intent storage,
/// and navigation to the login surface.
#[derive(Clone)]
pub struct Collaborators {
    pub http: Arc<dyn HttpBackend>,
    pub connector: Arc<dyn Connector>,
    pub storage: Arc<dyn IntentStorage>,
    pub navigator: Arc<dyn Navigator>,
}

impl Collaborators {
    pub fn new(
        http: Arc<dyn HttpBackend>,
        connector: Arc<dyn Connector>,
        storage: Arc<dyn IntentStorage>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            http,
            connector,
            storage,
            navigator,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// Read-only mirror of the loop's state for the handle's accessors.
struct ClientState {
    running: AtomicBool,
    snapshot: Mutex<Option<SessionSnapshot>>,
    client_color: Mutex<Option<PlayerColor>>,
    ticket_id: Mutex<Option<String>>,
    last_username: Mutex<Option<String>>,
}

impl ClientState {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            snapshot: Mutex::new(None),
            client_color: Mutex::new(None),
            ticket_id: Mutex::new(None),
            last_username: Mutex::new(None),
        }
    }
}

// ── Commands ────────────────────────────────────────────────────────

#[derive(Debug)]
enum Command {
    CreateSession { game_type: GameType },
    JoinSession { session_id: String },
    ShowMatchmaking,
    FindMatch { preferred_color: Option<PlayerColor> },
    CancelMatchmaking,
    Play { row: usize, column: usize },
    LeaveGame,
}

/// Results of spawned fetches, posted back to the loop.
enum Completion {
    LegalMoves {
        request: LegalMovesRequest,
        result: Result<Vec<Move>>,
    },
    MatchPoll {
        ticket_id: String,
        result: Result<MatchUpdate>,
    },
    MoveSubmitted {
        session_id: String,
        result: Result<GameProgress>,
    },
}

// ── Client handle ───────────────────────────────────────────────────

/// Async client handle.
///
/// Created via [`ReversiClient::start`], which spawns the background session
/// loop and returns this handle together with an event receiver. Command
/// methods return as soon as the command is queued; outcomes arrive as
/// [`ClientEvent`]s.
pub struct ReversiClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state: Arc<ClientState>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl ReversiClient {
    /// Start the session loop and return a handle plus event receiver.
    ///
    /// Before handling any command the loop consumes and replays the pending
    /// intent left by a previous login redirect, if there is one.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        collaborators: Collaborators,
        config: ReversiConfig,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<ClientEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel::<Completion>();

        let paths = ApiPaths::new(config.api_prefix.clone());
        let gateway = Arc::new(AuthGateway::new(
            collaborators.http,
            PendingIntentStore::new(collaborators.storage),
            collaborators.navigator,
            config.login_path.clone(),
            paths.auth_check(),
        ));
        let channels = ChannelManager::new(collaborators.connector)
            .with_teardown_timeout(config.channel_teardown_timeout);

        let state = Arc::new(ClientState::new());
        let session_loop = SessionLoop {
            api: GameApi::new(gateway, paths),
            channels,
            sync: TurnSynchronizer::new(config.pass_policy),
            view: SessionViewModel::new(),
            matchmaker: Matchmaker::new(config.creator_color),
            creator_color: config.creator_color,
            game: None,
            matchmaking: None,
            announced_game_over: None,
            completion_tx,
            completion_rx,
            event_tx,
            state: Arc::clone(&state),
        };

        let task = tokio::spawn(session_loop.run(cmd_rx, shutdown_rx));

        let client = Self {
            cmd_tx,
            state,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };

        (client, event_rx)
    }

    // ── Public API methods ──────────────────────────────────────────

    /// Create a new session and enter it as the configured creator color.
    /// Player-vs-player creation requires a login.
    ///
    /// # Errors
    ///
    /// Returns [`ReversiError::NotRunning`] if the session loop has exited.
    pub fn create_session(&self, game_type: GameType) -> Result<()> {
        self.send(Command::CreateSession { game_type })
    }

    /// Join an existing session by id.
    ///
    /// # Errors
    ///
    /// - [`ReversiError::InvalidInput`] if `session_id` is blank.
    /// - [`ReversiError::NotRunning`] if the session loop has exited.
    pub fn join_session(&self, session_id: impl Into<String>) -> Result<()> {
        let session_id = session_id.into().trim().to_string();
        if session_id.is_empty() {
            return Err(ReversiError::InvalidInput("session id is empty".into()));
        }
        self.send(Command::JoinSession { session_id })
    }

    /// Check the login and open the matchmaking dialog.
    ///
    /// # Errors
    ///
    /// Returns [`ReversiError::NotRunning`] if the session loop has exited.
    pub fn show_matchmaking(&self) -> Result<()> {
        self.send(Command::ShowMatchmaking)
    }

    /// Enter the matchmaking queue. Ignored while a ticket is already queued.
    ///
    /// # Errors
    ///
    /// Returns [`ReversiError::NotRunning`] if the session loop has exited.
    pub fn find_match(&self, preferred_color: Option<PlayerColor>) -> Result<()> {
        self.send(Command::FindMatch { preferred_color })
    }

    /// Cancel the queued ticket, or just dismiss the matchmaking UI if there
    /// is none.
    ///
    /// # Errors
    ///
    /// Returns [`ReversiError::NotRunning`] if the session loop has exited.
    pub fn cancel_matchmaking(&self) -> Result<()> {
        self.send(Command::CancelMatchmaking)
    }

    /// Place a piece for the local player. Ignored unless it is their turn.
    ///
    /// # Errors
    ///
    /// Returns [`ReversiError::NotRunning`] if the session loop has exited.
    pub fn play(&self, row: usize, column: usize) -> Result<()> {
        self.send(Command::Play { row, column })
    }

    /// Leave the current game session.
    ///
    /// # Errors
    ///
    /// Returns [`ReversiError::NotRunning`] if the session loop has exited.
    pub fn leave_game(&self) -> Result<()> {
        self.send(Command::LeaveGame)
    }

    /// Shut down the client, closing both subscriptions and stopping the
    /// background task.
    ///
    /// After calling this method, the event receiver yields
    /// [`ClientEvent::Stopped`] and then `None`, unless the loop had to be
    /// aborted. Subsequent command calls return [`ReversiError::NotRunning`].
    pub async fn shutdown(&mut self) {
        debug!("ReversiClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the session loop with a timeout. If it doesn't exit in time,
        // abort it so the task cannot detach and run indefinitely.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.running.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` while the session loop is running.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// The authoritative snapshot of the current game, if any.
    pub async fn current_snapshot(&self) -> Option<SessionSnapshot> {
        self.state.snapshot.lock().await.clone()
    }

    /// The local player's color in the current game.
    pub async fn client_color(&self) -> Option<PlayerColor> {
        *self.state.client_color.lock().await
    }

    /// The queued matchmaking ticket, if any.
    pub async fn matchmaking_ticket(&self) -> Option<String> {
        self.state.ticket_id.lock().await.clone()
    }

    /// Username from the most recent successful auth check.
    pub async fn last_username(&self) -> Option<String> {
        self.state.last_username.lock().await.clone()
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn send(&self, cmd: Command) -> Result<()> {
        if !self.state.running.load(Ordering::Acquire) {
            return Err(ReversiError::NotRunning);
        }
        self.cmd_tx.send(cmd).map_err(|_| ReversiError::NotRunning)
    }
}

impl std::fmt::Debug for ReversiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReversiClient")
            .field("running", &self.is_running())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for ReversiClient {
    fn drop(&mut self) {
        // No executor context for the graceful path here; just abort.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Session loop ────────────────────────────────────────────────────

/// One open subscription and the ticket or session it belongs to.
struct Channel<T> {
    key: String,
    subscription: Subscription,
    rx: mpsc::Receiver<T>,
}

impl<T> Channel<T> {
    async fn close(self) {
        drop(self.rx);
        self.subscription.close().await;
    }
}

/// Next message on `channel`, `None` once it has ended. Pends forever when
/// there is no channel.
async fn next_push<T>(channel: &mut Option<Channel<T>>) -> Option<T> {
    match channel {
        Some(channel) => channel.rx.recv().await,
        None => std::future::pending().await,
    }
}

struct SessionLoop {
    api: GameApi,
    channels: ChannelManager,
    sync: TurnSynchronizer,
    view: SessionViewModel,
    matchmaker: Matchmaker,
    creator_color: PlayerColor,
    game: Option<Channel<GameProgress>>,
    matchmaking: Option<Channel<MatchStatusPayload>>,
    /// Session id whose game-over has already been announced.
    announced_game_over: Option<String>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    event_tx: mpsc::Sender<ClientEvent>,
    state: Arc<ClientState>,
}

impl SessionLoop {
    /// Exits when the shutdown signal fires or every handle is gone.
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        debug!("session loop started");

        self.resume_pending_intent().await;

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown_rx => {
                    debug!("shutdown signal received");
                    break;
                }

                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        debug!("command channel closed, shutting down session loop");
                        break;
                    }
                },

                Some(done) = self.completion_rx.recv() => self.handle_completion(done).await,

                push = next_push(&mut self.game) => self.handle_game_push(push).await,

                push = next_push(&mut self.matchmaking) => self.handle_match_push(push).await,
            }
        }

        if let Some(channel) = self.matchmaking.take() {
            channel.close().await;
        }
        if let Some(channel) = self.game.take() {
            channel.close().await;
        }
        self.state.running.store(false, Ordering::Release);
        emit_stopped(&self.event_tx).await;
        debug!("session loop exited");
    }

    // ── Pending intent ──────────────────────────────────────────────

    async fn resume_pending_intent(&mut self) {
        let gateway = Arc::clone(self.api.gateway());
        let Some(intent) = gateway.store().consume() else {
            return;
        };
        let Some(_guard) = gateway.begin_replay() else {
            warn!(?intent, "replay already in progress; dropping pending intent");
            return;
        };
        info!(?intent, "resuming pending intent");
        emit_event(
            &self.event_tx,
            ClientEvent::IntentResumed {
                description: describe_intent(&intent),
            },
        )
        .await;

        match intent {
            PendingIntent::ShowMatchmakingDialog => self.show_matchmaking().await,
            PendingIntent::CreateSession { game_type } => self.create_session(game_type).await,
            PendingIntent::JoinSession { session_id } => {
                let session_id = session_id.trim().to_string();
                if session_id.is_empty() {
                    warn!("pending join intent has no session id; skipping");
                } else {
                    self.join_session(session_id).await;
                }
            }
            PendingIntent::EnqueueMatchmaking { preferred_color } => {
                self.find_match(preferred_color).await;
            }
        }
    }

    // ── Commands ────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        debug!(?cmd, "handling command");
        match cmd {
            Command::CreateSession { game_type } => self.create_session(game_type).await,
            Command::JoinSession { session_id } => self.join_session(session_id).await,
            Command::ShowMatchmaking => self.show_matchmaking().await,
            Command::FindMatch { preferred_color } => self.find_match(preferred_color).await,
            Command::CancelMatchmaking => self.cancel_matchmaking().await,
            Command::Play { row, column } => self.play(row, column),
            Command::LeaveGame => self.leave_game().await,
        }
    }

    async fn create_session(&mut self, game_type: GameType) {
        let intent = game_type
            .requires_auth()
            .then_some(PendingIntent::CreateSession { game_type });
        match self
            .api
            .create_session(game_type, self.creator_color, intent)
            .await
        {
            Ok(snapshot) => self.enter_game(snapshot, Some(self.creator_color)).await,
            Err(e) => self.report_failure("create session", e).await,
        }
    }

    async fn join_session(&mut self, session_id: String) {
        let intent = PendingIntent::JoinSession {
            session_id: session_id.clone(),
        };
        match self.api.join_session(&session_id, Some(intent)).await {
            Ok(snapshot) => {
                let color = self.creator_color.opposite();
                self.enter_game(snapshot, Some(color)).await;
            }
            Err(e) => self.report_failure("join session", e).await,
        }
    }

    async fn show_matchmaking(&mut self) {
        match self
            .api
            .auth_check(Some(PendingIntent::ShowMatchmakingDialog))
            .await
        {
            Ok(identity) => {
                *self.state.last_username.lock().await = identity.username.clone();
                emit_event(
                    &self.event_tx,
                    ClientEvent::MatchmakingDialog {
                        username: identity.username,
                    },
                )
                .await;
            }
            Err(e) => self.report_failure("auth check", e).await,
        }
    }

    async fn find_match(&mut self, preferred_color: Option<PlayerColor>) {
        if let Some(ticket_id) = self.matchmaker.ticket_id() {
            warn!(%ticket_id, "already queued for matchmaking; ignoring");
            return;
        }
        emit_event(&self.event_tx, ClientEvent::MatchmakingSearching).await;

        let intent = PendingIntent::EnqueueMatchmaking { preferred_color };
        let ticket_id = match self.api.enqueue(preferred_color, Some(intent)).await {
            Ok(ticket_id) => ticket_id,
            Err(e) if e.is_auth_redirect() => {
                debug!("enqueue interrupted by login redirect");
                return;
            }
            Err(e) => {
                warn!("enqueue failed: {e}");
                emit_terminal(
                    &self.event_tx,
                    ClientEvent::MatchmakingFailed {
                        message: MATCHMAKING_RETRY_MESSAGE.to_string(),
                    },
                )
                .await;
                return;
            }
        };

        self.matchmaker.enqueued(ticket_id.clone(), preferred_color);
        self.publish_ticket().await;
        emit_event(
            &self.event_tx,
            ClientEvent::MatchmakingQueued {
                ticket_id: ticket_id.clone(),
            },
        )
        .await;

        match self
            .channels
            .subscribe::<MatchStatusPayload>(Topic::Matchmaking(ticket_id.clone()))
            .await
        {
            Ok((subscription, rx)) => {
                self.matchmaking = Some(Channel {
                    key: ticket_id.clone(),
                    subscription,
                    rx,
                });
            }
            Err(e) => warn!(%ticket_id, "matchmaking channel unavailable, relying on status poll: {e}"),
        }

        // The match may have resolved before the subscription existed.
        self.spawn_match_poll(ticket_id);
    }

    async fn cancel_matchmaking(&mut self) {
        let Some(ticket_id) = self.matchmaker.cancel() else {
            debug!("cancel with no queued ticket; dismissing matchmaking UI");
            emit_event(&self.event_tx, ClientEvent::MatchmakingDismissed).await;
            return;
        };
        if let Err(e) = self.api.cancel(&ticket_id).await {
            warn!(%ticket_id, "cancel request failed, tearing down anyway: {e}");
        }
        self.close_matchmaking().await;
        emit_terminal(&self.event_tx, ClientEvent::MatchmakingCanceled { ticket_id }).await;
    }

    fn play(&mut self, row: usize, column: usize) {
        match self.sync.move_request(
            self.view.current_snapshot(),
            self.view.client_color(),
            row,
            column,
        ) {
            Ok(request) => self.spawn_move(request),
            Err(e) => info!("move not sent: {e}"),
        }
    }

    async fn leave_game(&mut self) {
        let session_id = self
            .view
            .current_snapshot()
            .map(|s| s.session_id().to_string());
        if let Some(channel) = self.game.take() {
            channel.close().await;
        }
        self.view.clear();
        self.announced_game_over = None;
        self.publish_game().await;
        info!(session = ?session_id, "left game");
        emit_event(&self.event_tx, ClientEvent::GameLeft { session_id }).await;
    }

    // ── Game session ────────────────────────────────────────────────

    /// Adopt `snapshot` as a new game: supersede the old subscription,
    /// render, and subscribe to the session's pushes.
    async fn enter_game(&mut self, snapshot: SessionSnapshot, color: Option<PlayerColor>) {
        if let Some(channel) = self.game.take() {
            channel.close().await;
        }
        let session_id = snapshot.session_id().to_string();
        info!(session = %session_id, ?color, "entering game");
        self.view.set_client_color(color);
        self.announced_game_over = None;
        emit_event(
            &self.event_tx,
            ClientEvent::GameEntered {
                session_id: session_id.clone(),
                color,
            },
        )
        .await;

        self.adopt(snapshot).await;

        match self
            .channels
            .subscribe::<GameProgress>(Topic::GameProgress(session_id.clone()))
            .await
        {
            Ok((subscription, rx)) => {
                self.game = Some(Channel {
                    key: session_id,
                    subscription,
                    rx,
                });
            }
            Err(e) => error!(session = %session_id, "game channel unavailable, no live updates: {e}"),
        }
    }

    /// Make `snapshot` authoritative and run one render pass for it.
    async fn adopt(&mut self, snapshot: SessionSnapshot) {
        let token = self.view.set_snapshot(snapshot);
        self.publish_game().await;

        let Some(current) = self.view.current_snapshot() else {
            return;
        };
        let plan = self.sync.plan(current, self.view.client_color(), token);
        let session_id = current.session_id().to_string();

        emit_event(&self.event_tx, ClientEvent::Rendered { view: plan.view }).await;

        if let Some(outcome) = plan.outcome {
            if self.announced_game_over.as_deref() != Some(session_id.as_str()) {
                self.announced_game_over = Some(session_id.clone());
                emit_terminal(
                    &self.event_tx,
                    ClientEvent::GameOver {
                        session_id,
                        outcome,
                    },
                )
                .await;
            }
        }

        if let Some(request) = plan.legal_moves {
            self.spawn_legal_moves(request);
        }
    }

    async fn handle_game_push(&mut self, push: Option<GameProgress>) {
        let Some(progress) = push else {
            if let Some(channel) = self.game.take() {
                warn!(session = %channel.key, "game channel lost; not reconnecting");
            }
            return;
        };
        if let Some(message) = progress.message.as_deref() {
            debug!(%message, "game progress");
        }
        let Some(summary) = progress.session_summary else {
            debug!("game progress without a session summary");
            return;
        };
        let snapshot = match SessionSnapshot::try_from(summary) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("discarding pushed snapshot: {e}");
                return;
            }
        };
        let current = self.view.current_snapshot().map(SessionSnapshot::session_id);
        if current.is_some_and(|id| id != snapshot.session_id()) {
            debug!(session = snapshot.session_id(), "push for another session; ignoring");
            return;
        }
        self.adopt(snapshot).await;
    }

    // ── Matchmaking ─────────────────────────────────────────────────

    async fn handle_match_push(&mut self, push: Option<MatchStatusPayload>) {
        let Some(payload) = push else {
            let Some(channel) = self.matchmaking.take() else {
                return;
            };
            if self.matchmaker.ticket_id() == Some(channel.key.as_str()) {
                warn!(ticket_id = %channel.key, "matchmaking channel lost; polling once");
                self.spawn_match_poll(channel.key);
            }
            return;
        };
        let Some(ticket_id) = self.matchmaking.as_ref().map(|c| c.key.clone()) else {
            return;
        };
        match MatchUpdate::try_from(payload) {
            Ok(update) => self.handle_match_update(ticket_id, update).await,
            Err(e) => warn!(%ticket_id, "discarding matchmaking update: {e}"),
        }
    }

    /// Shared by push and poll; safe under duplicate delivery.
    async fn handle_match_update(&mut self, ticket_id: String, update: MatchUpdate) {
        match self.matchmaker.apply(&ticket_id, update) {
            MatchTransition::Ignored | MatchTransition::StillQueued => {}
            MatchTransition::Found { snapshot, color } => {
                self.close_matchmaking().await;
                emit_terminal(
                    &self.event_tx,
                    ClientEvent::MatchmakingFound {
                        ticket_id,
                        session_id: snapshot.session_id().to_string(),
                        color: Some(color),
                    },
                )
                .await;
                self.enter_game(snapshot, Some(color)).await;
            }
            MatchTransition::Canceled => {
                self.close_matchmaking().await;
                emit_terminal(&self.event_tx, ClientEvent::MatchmakingCanceled { ticket_id }).await;
            }
            MatchTransition::Expired => {
                self.close_matchmaking().await;
                emit_terminal(&self.event_tx, ClientEvent::MatchmakingExpired { ticket_id }).await;
            }
        }
    }

    async fn close_matchmaking(&mut self) {
        if let Some(channel) = self.matchmaking.take() {
            channel.close().await;
        }
        self.publish_ticket().await;
    }

    // ── Completions ─────────────────────────────────────────────────

    async fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::LegalMoves { request, result } => {
                match self.sync.resolve(&self.view, &request, result) {
                    TurnResolution::Highlight(view) => {
                        emit_event(&self.event_tx, ClientEvent::Rendered { view }).await;
                    }
                    TurnResolution::Pass(pass) => self.spawn_move(pass),
                    TurnResolution::AwaitPush
                    | TurnResolution::Unhighlighted
                    | TurnResolution::Stale => {}
                }
            }
            Completion::MatchPoll { ticket_id, result } => match result {
                Ok(update) => self.handle_match_update(ticket_id, update).await,
                Err(e) => warn!(%ticket_id, "matchmaking status poll failed: {e}"),
            },
            Completion::MoveSubmitted { session_id, result } => match result {
                Ok(ack) => debug!(session = %session_id, message = ?ack.message, "move acknowledged"),
                Err(e) => warn!(session = %session_id, "move submission failed: {e}"),
            },
        }
    }

    fn spawn_legal_moves(&self, request: LegalMovesRequest) {
        let api = self.api.clone();
        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = api.possible_moves(&request.session_id, request.color).await;
            let _ = tx.send(Completion::LegalMoves { request, result });
        });
    }

    fn spawn_match_poll(&self, ticket_id: String) {
        let api = self.api.clone();
        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = api.match_status(&ticket_id).await;
            let _ = tx.send(Completion::MatchPoll { ticket_id, result });
        });
    }

    fn spawn_move(&self, request: MoveRequest) {
        debug!(
            session = %request.session_id,
            row = request.row,
            column = request.column,
            color = %request.color,
            pass = request.pass,
            "submitting move"
        );
        let api = self.api.clone();
        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = api.submit_move(&request).await;
            let _ = tx.send(Completion::MoveSubmitted {
                session_id: request.session_id,
                result,
            });
        });
    }

    // ── Helpers ─────────────────────────────────────────────────────

    /// Login redirects are silent; everything else becomes an error event.
    async fn report_failure(&self, context: &str, e: ReversiError) {
        if e.is_auth_redirect() {
            debug!("{context} interrupted by login redirect");
            return;
        }
        warn!("{context} failed: {e}");
        emit_event(
            &self.event_tx,
            ClientEvent::Error {
                message: format!("{context} failed: {e}"),
            },
        )
        .await;
    }

    async fn publish_game(&self) {
        *self.state.snapshot.lock().await = self.view.current_snapshot().cloned();
        *self.state.client_color.lock().await = self.view.client_color();
    }

    async fn publish_ticket(&self) {
        *self.state.ticket_id.lock().await = self.matchmaker.ticket_id().map(str::to_string);
    }
}

fn describe_intent(intent: &PendingIntent) -> String {
    match intent {
        PendingIntent::ShowMatchmakingDialog => "open matchmaking".to_string(),
        PendingIntent::CreateSession { game_type } => format!("create {game_type} session"),
        PendingIntent::JoinSession { session_id } => format!("join session {session_id}"),
        PendingIntent::EnqueueMatchmaking { .. } => "find a match".to_string(),
    }
}

/// Emit an event to the event channel. If the channel is full, log a warning
/// and drop the event to avoid blocking the session loop.
async fn emit_event(event_tx: &mpsc::Sender<ClientEvent>, event: ClientEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit an event that must never be dropped: game over and the end of a
/// matchmaking ticket. Waits for room in the channel instead of dropping.
async fn emit_terminal(event_tx: &mpsc::Sender<ClientEvent>, event: ClientEvent) {
    if event_tx.send(event).await.is_err() {
        debug!("event channel closed, receiver dropped");
    }
}

/// `Stopped` is always the last event.
async fn emit_stopped(event_tx: &mpsc::Sender<ClientEvent>) {
    emit_terminal(event_tx, ClientEvent::Stopped).await;
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::http::{HttpRequest, HttpResponse};
    use crate::intent::MemoryStorage;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    // ── Mock collaborators ──────────────────────────────────────────

    /// Answers every request with the same response and records the paths.
    struct FixedBackend {
        response: HttpResponse,
        paths: StdMutex<Vec<String>>,
    }

    impl FixedBackend {
        fn new(response: HttpResponse) -> Arc<Self> {
            Arc::new(Self {
                response,
                paths: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpBackend for FixedBackend {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.paths.lock().unwrap().push(request.path_and_query());
            Ok(self.response.clone())
        }
    }

    /// Never answers.
    struct HangingBackend;

    #[async_trait]
    impl HttpBackend for HangingBackend {
        async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse> {
            std::future::pending().await
        }
    }

    struct OfflineConnector;

    #[async_trait]
    impl Connector for OfflineConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>> {
            Err(ReversiError::Channel("offline".into()))
        }
    }

    #[derive(Default)]
    struct RecordingNavigator {
        visited: StdMutex<Vec<String>>,
    }

    impl Navigator for RecordingNavigator {
        fn current_location(&self) -> String {
            "/".into()
        }

        fn navigate(&self, url: &str) {
            self.visited.lock().unwrap().push(url.to_string());
        }
    }

    fn collaborators(http: Arc<dyn HttpBackend>) -> (Collaborators, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let collaborators = Collaborators::new(
            http,
            Arc::new(OfflineConnector),
            storage.clone(),
            Arc::new(RecordingNavigator::default()),
        );
        (collaborators, storage)
    }

    fn start_with(http: Arc<dyn HttpBackend>) -> (ReversiClient, mpsc::Receiver<ClientEvent>) {
        let (collaborators, _) = collaborators(http);
        ReversiClient::start(collaborators, ReversiConfig::new())
    }

    // ── Configuration ───────────────────────────────────────────────

    #[test]
    fn config_defaults() {
        let config = ReversiConfig::new();
        assert_eq!(config.api_prefix, "");
        assert_eq!(config.login_path, "/login");
        assert_eq!(config.pass_policy, PassPolicy::AwaitPush);
        assert_eq!(config.creator_color, PlayerColor::White);
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.channel_teardown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn config_builder_methods() {
        let config = ReversiConfig::new()
            .with_api_prefix("/reversi")
            .with_login_path("/signin")
            .with_pass_policy(PassPolicy::AutoPass)
            .with_creator_color(PlayerColor::Black)
            .with_event_channel_capacity(512)
            .with_shutdown_timeout(Duration::from_secs(5))
            .with_channel_teardown_timeout(Duration::from_millis(200));
        assert_eq!(config.api_prefix, "/reversi");
        assert_eq!(config.login_path, "/signin");
        assert_eq!(config.pass_policy, PassPolicy::AutoPass);
        assert_eq!(config.creator_color, PlayerColor::Black);
        assert_eq!(config.event_channel_capacity, 512);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.channel_teardown_timeout, Duration::from_millis(200));
    }

    #[test]
    fn event_channel_capacity_is_clamped_to_one() {
        let config = ReversiConfig::new().with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    #[tokio::test]
    async fn shutdown_emits_stopped_last() {
        let (mut client, mut events) = start_with(FixedBackend::new(HttpResponse::new(200, "{}")));
        assert!(client.is_running());

        client.shutdown().await;
        assert!(!client.is_running());
        assert_eq!(events.recv().await, Some(ClientEvent::Stopped));
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn commands_fail_after_shutdown() {
        let (mut client, _events) = start_with(FixedBackend::new(HttpResponse::new(200, "{}")));
        client.shutdown().await;
        assert!(matches!(
            client.find_match(None),
            Err(ReversiError::NotRunning)
        ));
        client.shutdown().await; // should not panic
    }

    #[tokio::test]
    async fn blank_session_id_is_rejected_up_front() {
        let backend = FixedBackend::new(HttpResponse::new(200, "{}"));
        let (mut client, _events) = start_with(backend.clone());
        let err = client.join_session("   ").unwrap_err();
        assert!(matches!(err, ReversiError::InvalidInput(_)));
        client.shutdown().await;
        assert!(backend.paths.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_timeout_aborts_stuck_loop() {
        let (collaborators, _) = collaborators(Arc::new(HangingBackend));
        let config = ReversiConfig::new().with_shutdown_timeout(Duration::from_millis(20));
        let (mut client, mut events) = ReversiClient::start(collaborators, config);

        // The loop is now parked on an auth check that never completes.
        client.show_matchmaking().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        client.shutdown().await;
        assert!(!client.is_running());
        // Aborted before it could emit Stopped.
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn drop_without_explicit_shutdown() {
        let (client, mut events) = start_with(FixedBackend::new(HttpResponse::new(200, "{}")));
        drop(client);
        while let Some(_event) = events.recv().await {}
    }

    #[tokio::test]
    async fn debug_impl_for_client() {
        let (mut client, _events) = start_with(FixedBackend::new(HttpResponse::new(200, "{}")));
        let debug = format!("{client:?}");
        assert!(debug.contains("ReversiClient"));
        assert!(debug.contains("running"));
        client.shutdown().await;
    }

    // ── Behaviour ───────────────────────────────────────────────────

    #[tokio::test]
    async fn cancel_without_ticket_dismisses() {
        let backend = FixedBackend::new(HttpResponse::new(200, "{}"));
        let (mut client, mut events) = start_with(backend.clone());
        client.cancel_matchmaking().unwrap();
        assert_eq!(events.recv().await, Some(ClientEvent::MatchmakingDismissed));
        client.shutdown().await;
        assert!(backend.paths.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn show_matchmaking_caches_username() {
        let (mut client, mut events) = start_with(FixedBackend::new(HttpResponse::new(
            200,
            r#"{"username":"ann","roles":["USER"]}"#,
        )));
        client.show_matchmaking().unwrap();
        assert_eq!(
            events.recv().await,
            Some(ClientEvent::MatchmakingDialog {
                username: Some("ann".into())
            })
        );
        assert_eq!(client.last_username().await.as_deref(), Some("ann"));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn play_without_game_sends_nothing() {
        let backend = FixedBackend::new(HttpResponse::new(200, "{}"));
        let (mut client, _events) = start_with(backend.clone());
        client.play(2, 3).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.shutdown().await;
        assert!(backend.paths.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn server_error_on_create_becomes_error_event() {
        let (mut client, mut events) = start_with(FixedBackend::new(HttpResponse::new(500, "")));
        client.create_session(GameType::PlayerVsComputer).unwrap();
        let Some(ClientEvent::Error { message }) = events.recv().await else {
            panic!("expected an error event");
        };
        assert!(message.contains("create session"));
        assert!(client.current_snapshot().await.is_none());
        client.shutdown().await;
    }

    #[test]
    fn intents_are_described_for_the_resume_banner() {
        assert_eq!(
            describe_intent(&PendingIntent::JoinSession {
                session_id: "g1".into()
            }),
            "join session g1"
        );
        assert_eq!(
            describe_intent(&PendingIntent::CreateSession {
                game_type: GameType::PlayerVsPlayer
            }),
            "create PLAYER_VS_PLAYER session"
        );
    }
}
