//! # Play Online Example
//!
//! Demonstrates a complete Reversi client lifecycle against a running
//! service:
//!
//! 1. Replay whatever the user was doing before a login redirect
//! 2. Enter the matchmaking queue
//! 3. Adopt the matched session and follow its pushes
//! 4. Play the first highlighted square whenever it is our turn
//! 5. Shut down gracefully on Ctrl+C or game over
//!
//! ## Running
//!
//! ```sh
//! # Start the Reversi service on localhost:8080, then:
//! cargo run --example play_online
//!
//! # Override the endpoints:
//! REVERSI_URL=http://my-host:8080 \
//! REVERSI_WS_URL=ws://my-host:8080/ws/game/websocket \
//!     cargo run --example play_online
//! ```
//!
//! Without a session cookie the first request redirects to the login
//! surface; the example prints the login URL, remembers the intent in
//! `.reversi/`, and resumes it on the next run.

use std::sync::Arc;

use reversi_client::{
    BoardView, ClientEvent, Collaborators, FileStorage, Navigator, ReqwestBackend, ReversiClient,
    ReversiConfig, WebSocketConnector,
};
use reversi_client::snapshot::Cell;

/// Default service URL when `REVERSI_URL` is not set.
const DEFAULT_URL: &str = "http://localhost:8080";

/// Default push endpoint when `REVERSI_WS_URL` is not set.
const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws/game/websocket";

/// A terminal has nowhere to navigate to; print the URL instead.
struct PrintingNavigator {
    base_url: String,
}

impl Navigator for PrintingNavigator {
    fn current_location(&self) -> String {
        "/play".to_string()
    }

    fn navigate(&self, url: &str) {
        println!("Please log in at {}{url} and run the example again.", self.base_url);
    }
}

fn draw(view: &BoardView) {
    println!(
        "{} (black) {} : {} {} (white)",
        view.black_name, view.black_score, view.white_score, view.white_name
    );
    for (row, cells) in view.cells.iter().enumerate() {
        let line: String = cells
            .iter()
            .enumerate()
            .map(|(column, cell)| match cell {
                Cell::Black => 'B',
                Cell::White => 'W',
                Cell::Empty if view.is_highlighted(row, column) => '*',
                Cell::Empty => '.',
            })
            .collect();
        println!("  {line}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Initialize tracing. Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("REVERSI_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let ws_url = std::env::var("REVERSI_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string());
    tracing::info!("Using service {url}, push endpoint {ws_url}");

    let collaborators = Collaborators::new(
        Arc::new(ReqwestBackend::new(&url)?),
        Arc::new(WebSocketConnector::new(&ws_url)),
        Arc::new(FileStorage::new(".reversi")),
        Arc::new(PrintingNavigator {
            base_url: url.clone(),
        }),
    );

    // Start the client. A pending intent from an earlier run is replayed
    // before anything else.
    let (mut client, mut event_rx) = ReversiClient::start(collaborators, ReversiConfig::new());
    client.find_match(None)?;

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    tracing::info!("Event channel closed, exiting");
                    break;
                };

                match event {
                    ClientEvent::IntentResumed { description } => {
                        tracing::info!("Resuming: {description}");
                    }
                    ClientEvent::MatchmakingQueued { ticket_id } => {
                        tracing::info!("Waiting for an opponent (ticket {ticket_id})");
                    }
                    ClientEvent::MatchmakingFound { session_id, color, .. } => {
                        tracing::info!("Matched into {session_id} as {color:?}");
                    }
                    ClientEvent::MatchmakingExpired { .. } | ClientEvent::MatchmakingCanceled { .. } => {
                        tracing::info!("No opponent found, trying again");
                        client.find_match(None)?;
                    }
                    ClientEvent::MatchmakingFailed { message } => {
                        tracing::warn!("{message}");
                        break;
                    }
                    ClientEvent::Rendered { view } => {
                        draw(&view);
                        // Highlights only arrive on our turn.
                        if let Some(first) = view.highlights.first() {
                            tracing::info!("Playing ({}, {})", first.row, first.column);
                            client.play(first.row, first.column)?;
                        }
                    }
                    ClientEvent::GameOver { outcome, .. } => {
                        tracing::info!("Game over: {outcome:?}");
                        break;
                    }
                    ClientEvent::Error { message } => {
                        tracing::warn!("Error: {message}");
                    }
                    ClientEvent::Stopped => break,
                    other => {
                        tracing::debug!("Event: {other:?}");
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, cancelling matchmaking and shutting down");
                let _ = client.cancel_matchmaking();
                break;
            }
        }
    }

    // ── Clean shutdown ──────────────────────────────────────────────
    client.shutdown().await;
    tracing::info!("Client shut down. Goodbye!");
    Ok(())
}
