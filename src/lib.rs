//! # Reversi Client
//!
//! Session synchronization and matchmaking client for an online Reversi
//! service.
//!
//! The service exposes REST endpoints for sessions, moves and matchmaking,
//! and pushes game progress and match status over STOMP-framed WebSocket
//! topics. This crate keeps one authoritative snapshot per game, discards
//! stale asynchronous results, and replays the user's last action after a
//! login redirect.
//!
//! ## Features
//!
//! - **Event-driven**: receive typed [`ClientEvent`]s via a channel
//! - **Pluggable I/O**: implement [`HttpBackend`], [`Connector`],
//!   [`IntentStorage`] and [`Navigator`] for any environment
//! - **WebSocket built-in**: the default `transport-websocket` feature
//!   provides [`WebSocketConnector`]
//! - **reqwest built-in**: the default `transport-http` feature provides
//!   [`ReqwestBackend`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use reversi_client::{
//!     ClientEvent, Collaborators, FileStorage, ReqwestBackend, ReversiClient,
//!     ReversiConfig, WebSocketConnector,
//! };
//!
//! let collaborators = Collaborators::new(
//!     Arc::new(ReqwestBackend::new("http://localhost:8080")?),
//!     Arc::new(WebSocketConnector::new("ws://localhost:8080/ws/game/websocket")),
//!     Arc::new(FileStorage::new(".reversi")),
//!     Arc::new(TerminalNavigator),
//! );
//! let (mut client, mut events) = ReversiClient::start(collaborators, ReversiConfig::new());
//! client.find_match(None)?;
//! while let Some(event) = events.recv().await {
//!     if let ClientEvent::Rendered { view } = event {
//!         println!("{} vs {}", view.black_score, view.white_score);
//!     }
//! }
//! ```

pub mod api;
pub mod client;
pub mod error;
pub mod event;
pub mod gateway;
pub mod http;
pub mod intent;
pub mod matchmaking;
pub mod protocol;
pub mod realtime;
pub mod snapshot;
pub mod stomp;
pub mod transport;
pub mod transports;
pub mod turn;
pub mod view_model;

// Re-export primary types for ergonomic imports.
pub use client::{Collaborators, ReversiClient, ReversiConfig};
pub use error::ReversiError;
pub use event::ClientEvent;
pub use gateway::Navigator;
pub use http::{HttpBackend, HttpRequest, HttpResponse};
pub use intent::{FileStorage, IntentStorage, MemoryStorage, PendingIntent};
pub use protocol::{GameType, Move, PlayerColor};
pub use snapshot::{Outcome, SessionSnapshot};
pub use transport::{Connector, Transport};
pub use turn::{BoardView, PassPolicy};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};

#[cfg(feature = "transport-http")]
pub use transports::ReqwestBackend;
