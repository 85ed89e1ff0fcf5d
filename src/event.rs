//! Events delivered to the presentation layer.
//!
//! [`ReversiClient::start`](crate::ReversiClient::start) returns the receiving
//! end of a bounded channel of [`ClientEvent`]s. Events are emitted by the
//! session loop in the order it makes decisions; presentation code only
//! needs to draw what it is told.

use crate::protocol::PlayerColor;
use crate::snapshot::Outcome;
use crate::turn::BoardView;

/// Something the presentation layer should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A pending intent saved before a login redirect is being replayed.
    IntentResumed { description: String },

    // ── Matchmaking ─────────────────────────────────────────────────
    /// The user is authenticated; open the matchmaking dialog.
    MatchmakingDialog { username: Option<String> },
    /// An enqueue request is on its way.
    MatchmakingSearching,
    /// The service issued a ticket; waiting for an opponent.
    MatchmakingQueued { ticket_id: String },
    /// An opponent was found. Followed by [`ClientEvent::GameEntered`].
    MatchmakingFound {
        ticket_id: String,
        session_id: String,
        color: Option<PlayerColor>,
    },
    /// The ticket was canceled, by the user or the service.
    MatchmakingCanceled { ticket_id: String },
    /// The service gave up looking for an opponent.
    MatchmakingExpired { ticket_id: String },
    /// Enqueue failed; show a generic retry message.
    MatchmakingFailed { message: String },
    /// Close any open matchmaking UI.
    MatchmakingDismissed,

    // ── Game ────────────────────────────────────────────────────────
    /// A session was adopted and its push channel is being opened.
    GameEntered {
        session_id: String,
        color: Option<PlayerColor>,
    },
    /// Draw this board.
    Rendered { view: BoardView },
    /// The game finished. Emitted once per session.
    GameOver {
        session_id: String,
        outcome: Outcome,
    },
    /// The local player left the session.
    GameLeft { session_id: Option<String> },

    // ── Lifecycle ───────────────────────────────────────────────────
    /// A user-visible failure.
    Error { message: String },
    /// The session loop has exited. Always the last event.
    Stopped,
}
