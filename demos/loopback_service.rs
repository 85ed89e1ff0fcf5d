//! # Loopback Service Example
//!
//! Shows how to plug your own [`HttpBackend`] and [`Connector`] into the
//! client with a tiny in-process stand-in for the Reversi service. This is
//! useful for:
//!
//! - **Testing**: exercise game flows without a real server
//! - **Custom backends**: adapt any I/O layer to the client's seams
//!
//! The stand-in plays white against you, always taking the first empty
//! square, and declares a winner after a few moves. It is not Reversi; it
//! only speaks the same wire format.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example loopback_service
//! ```

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reversi_client::http::{HttpRequest, HttpResponse};
use reversi_client::stomp::{self, Command, Frame};
use reversi_client::{
    ClientEvent, Collaborators, Connector, GameType, HttpBackend, MemoryStorage, Navigator,
    PlayerColor, ReversiClient, ReversiConfig, ReversiError, Transport,
};
use tokio::sync::mpsc;

const SESSION_ID: &str = "loopback-1";
const MOVES_UNTIL_GAME_OVER: usize = 3;

// ─────────────────────────────────────────────────────────────────────
// Step 1: The fake service's game state
// ─────────────────────────────────────────────────────────────────────

struct Game {
    cells: Vec<Vec<String>>,
    turn: PlayerColor,
    moves_played: usize,
}

impl Game {
    fn new() -> Self {
        let mut game = Self {
            cells: vec![vec![String::new(); 8]; 8],
            turn: PlayerColor::Black,
            moves_played: 0,
        };
        for (row, column, piece) in [(3, 3, "W"), (3, 4, "B"), (4, 3, "B"), (4, 4, "W")] {
            game.place(row, column, piece);
        }
        game
    }

    fn empty_squares(&self) -> Vec<(usize, usize)> {
        let mut squares = Vec::new();
        for (row, cells) in self.cells.iter().enumerate() {
            for (column, cell) in cells.iter().enumerate() {
                if cell.is_empty() {
                    squares.push((row, column));
                }
            }
        }
        squares
    }

    fn place(&mut self, row: usize, column: usize, piece: &str) {
        if let Some(cell) = self.cells.get_mut(row).and_then(|r| r.get_mut(column)) {
            *cell = piece.to_string();
        }
    }

    fn summary(&self) -> serde_json::Value {
        let state = if self.moves_played >= MOVES_UNTIL_GAME_OVER {
            "BLACK_WINS"
        } else {
            "IN_PROGRESS"
        };
        serde_json::json!({
            "sessionId": SESSION_ID,
            "board": {"boardCells": self.cells},
            "currentPlayerColor": self.turn.as_str(),
            "gameState": state,
            "gameType": "PLAYER_VS_COMPUTER",
            "playerColors": ["BLACK", "WHITE"],
            "playerNicknames": ["you", "loopback"]
        })
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: A broker that remembers who listens where
// ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Listeners {
    /// (destination, subscription id, sender)
    entries: Vec<(String, String, mpsc::UnboundedSender<String>)>,
}

#[derive(Clone)]
struct LoopbackService {
    game: Arc<Mutex<Game>>,
    listeners: Arc<Mutex<Listeners>>,
}

impl LoopbackService {
    fn new() -> Self {
        Self {
            game: Arc::new(Mutex::new(Game::new())),
            listeners: Arc::new(Mutex::new(Listeners::default())),
        }
    }

    fn publish(&self, destination: &str, body: &str) {
        let Ok(listeners) = self.listeners.lock() else {
            return;
        };
        for (dest, id, tx) in &listeners.entries {
            if dest == destination {
                let frame = Frame::new(Command::Message)
                    .with_header("subscription", id.as_str())
                    .with_header("destination", destination)
                    .with_body(body);
                let _ = tx.send(frame.encode());
            }
        }
    }

    fn handle_move(&self, body: &str) -> HttpResponse {
        let Ok(request) = serde_json::from_str::<serde_json::Value>(body) else {
            return HttpResponse::new(400, "");
        };
        let coordinate = |name: &str| request.get(name).and_then(serde_json::Value::as_u64);
        let (Some(row), Some(column)) = (coordinate("row"), coordinate("column")) else {
            return HttpResponse::new(400, "");
        };
        let Ok(mut game) = self.game.lock() else {
            return HttpResponse::new(500, "");
        };

        game.place(row as usize, column as usize, "B");
        game.moves_played += 1;
        // The computer answers straight away on the first empty square.
        if let Some(&(r, c)) = game.empty_squares().first() {
            game.place(r, c, "W");
        }
        game.turn = PlayerColor::Black;

        let progress = serde_json::json!({
            "message": "Move successful",
            "sessionSummary": game.summary()
        })
        .to_string();
        drop(game);
        self.publish(&format!("/topic/game-progress/{SESSION_ID}"), &progress);
        HttpResponse::new(200, progress)
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Implement HttpBackend
// ─────────────────────────────────────────────────────────────────────

#[async_trait]
impl HttpBackend for LoopbackService {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ReversiError> {
        tracing::info!("Service received: {:?} {}", request.method, request.path_and_query());
        let sessions = "/api/v1/sessions";
        let response = if request.path == sessions {
            let summary = self
                .game
                .lock()
                .map(|g| g.summary().to_string())
                .unwrap_or_default();
            HttpResponse::new(200, summary)
        } else if request.path == format!("{sessions}/{SESSION_ID}/possible-moves") {
            let moves: Vec<serde_json::Value> = self
                .game
                .lock()
                .map(|g| g.empty_squares())
                .unwrap_or_default()
                .into_iter()
                .take(3)
                .map(|(row, column)| serde_json::json!({"row": row, "column": column}))
                .collect();
            HttpResponse::new(200, serde_json::Value::Array(moves).to_string())
        } else if request.path == format!("{sessions}/{SESSION_ID}/moves") {
            self.handle_move(request.body.as_deref().unwrap_or_default())
        } else {
            HttpResponse::new(404, "")
        };
        Ok(response)
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 4: Implement Connector and Transport
// ─────────────────────────────────────────────────────────────────────

struct LoopbackConnection {
    service: LoopbackService,
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Connector for LoopbackService {
    async fn connect(&self) -> Result<Box<dyn Transport>, ReversiError> {
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Box::new(LoopbackConnection {
            service: self.clone(),
            tx,
            rx,
        }))
    }
}

#[async_trait]
impl Transport for LoopbackConnection {
    /// Answer the client's STOMP frames the way a broker would.
    async fn send(&mut self, message: String) -> Result<(), ReversiError> {
        for frame in stomp::decode(&message)? {
            let reply = match frame.command {
                Command::Connect => Some(Frame::new(Command::Connected).with_header("version", "1.2")),
                Command::Subscribe => {
                    let destination = frame.header("destination").unwrap_or_default();
                    let id = frame.header("id").unwrap_or_default();
                    if let Ok(mut listeners) = self.service.listeners.lock() {
                        listeners
                            .entries
                            .push((destination.to_string(), id.to_string(), self.tx.clone()));
                    }
                    None
                }
                Command::Disconnect => frame
                    .header("receipt")
                    .map(|receipt| Frame::new(Command::Receipt).with_header("receipt-id", receipt)),
                _ => None,
            };
            if let Some(reply) = reply {
                self.tx
                    .send(reply.encode())
                    .map_err(|e| ReversiError::TransportSend(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// This method is **cancel-safe** because `mpsc::UnboundedReceiver::recv`
    /// is cancel-safe.
    async fn recv(&mut self) -> Option<Result<String, ReversiError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), ReversiError> {
        if let Ok(mut listeners) = self.service.listeners.lock() {
            listeners
                .entries
                .retain(|(_, _, tx)| !tx.same_channel(&self.tx));
        }
        Ok(())
    }
}

/// Nothing in this example requires a login.
struct NoNavigation;

impl Navigator for NoNavigation {
    fn current_location(&self) -> String {
        "/".to_string()
    }

    fn navigate(&self, url: &str) {
        tracing::warn!("Unexpected login redirect to {url}");
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 5: Wire together the client and the fake service
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let service = LoopbackService::new();
    let collaborators = Collaborators::new(
        Arc::new(service.clone()),
        Arc::new(service),
        Arc::new(MemoryStorage::new()),
        Arc::new(NoNavigation),
    );
    let config = ReversiConfig::new().with_creator_color(PlayerColor::Black);
    let (mut client, mut event_rx) = ReversiClient::start(collaborators, config);

    client.create_session(GameType::PlayerVsComputer)?;

    while let Some(event) = event_rx.recv().await {
        match event {
            ClientEvent::Rendered { view } => {
                tracing::info!(
                    "Board {} : black {} white {}, {} highlighted",
                    view.token,
                    view.black_score,
                    view.white_score,
                    view.highlights.len()
                );
                if let Some(first) = view.highlights.first() {
                    client.play(first.row, first.column)?;
                }
            }
            ClientEvent::GameOver { outcome, .. } => {
                tracing::info!("Game over: {outcome:?}");
                break;
            }
            ClientEvent::Stopped => break,
            other => tracing::info!("Event: {other:?}"),
        }
    }

    client.shutdown().await;
    tracing::info!("Done. The loopback service works!");
    Ok(())
}
