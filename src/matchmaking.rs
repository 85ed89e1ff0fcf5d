//! Matchmaking State Machine.
//!
//! ```text
//! Idle ──enqueued──▶ Queued ──FOUND──▶ Found
//!                      │  ├──CANCELED / cancel()──▶ Canceled
//!                      │  └──EXPIRED──▶ Expired
//!                      └──WAITING──▶ Queued
//! ```
//!
//! Updates reach [`Matchmaker::apply`] from both the push channel and the
//! post-enqueue status poll, in no particular order. Only the first terminal
//! update for the current ticket produces a transition; anything for another
//! ticket, or after the ticket has ended, is [`MatchTransition::Ignored`].

use std::fmt;

use tracing::{debug, info, warn};

use crate::protocol::{MatchStatus, MatchUpdate, PlayerColor};
use crate::snapshot::SessionSnapshot;

/// Where the current (or most recent) ticket stands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MatchState {
    #[default]
    Idle,
    Queued {
        ticket_id: String,
    },
    Found {
        ticket_id: String,
    },
    Canceled {
        ticket_id: String,
    },
    Expired {
        ticket_id: String,
    },
}

impl fmt::Display for MatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Queued { ticket_id } => write!(f, "queued({ticket_id})"),
            Self::Found { ticket_id } => write!(f, "found({ticket_id})"),
            Self::Canceled { ticket_id } => write!(f, "canceled({ticket_id})"),
            Self::Expired { ticket_id } => write!(f, "expired({ticket_id})"),
        }
    }
}

/// Effect of applying one update.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchTransition {
    /// Duplicate, late, or for a different ticket.
    Ignored,
    /// Still waiting for an opponent.
    StillQueued,
    /// Matched: adopt `snapshot` and play as `color`.
    Found {
        snapshot: SessionSnapshot,
        color: PlayerColor,
    },
    Canceled,
    Expired,
}

/// Drives one ticket at a time.
#[derive(Debug)]
pub struct Matchmaker {
    state: MatchState,
    preferred_color: Option<PlayerColor>,
    fallback_color: PlayerColor,
}

impl Matchmaker {
    /// `fallback_color` is played when the service assigns no color and the
    /// enqueue carried no preference.
    pub fn new(fallback_color: PlayerColor) -> Self {
        Self {
            state: MatchState::Idle,
            preferred_color: None,
            fallback_color,
        }
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    /// The live ticket, if queued.
    pub fn ticket_id(&self) -> Option<&str> {
        match &self.state {
            MatchState::Queued { ticket_id } => Some(ticket_id.as_str()),
            _ => None,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self.state, MatchState::Queued { .. })
    }

    /// Record a successful enqueue. Any previous ticket is forgotten.
    pub fn enqueued(&mut self, ticket_id: impl Into<String>, preferred_color: Option<PlayerColor>) {
        let ticket_id = ticket_id.into();
        if let MatchState::Queued { ticket_id: old } = &self.state {
            warn!(%old, new = %ticket_id, "replacing a live matchmaking ticket");
        }
        info!(%ticket_id, ?preferred_color, "matchmaking ticket queued");
        self.state = MatchState::Queued { ticket_id };
        self.preferred_color = preferred_color;
    }

    /// Apply an update for `ticket_id`.
    pub fn apply(&mut self, ticket_id: &str, update: MatchUpdate) -> MatchTransition {
        let live = matches!(&self.state, MatchState::Queued { ticket_id: t } if t == ticket_id);
        if !live {
            debug!(%ticket_id, state = %self.state, status = ?update.status, "ignoring matchmaking update");
            return MatchTransition::Ignored;
        }

        let ticket_id = ticket_id.to_string();
        match update.status {
            MatchStatus::Queued => MatchTransition::StillQueued,
            MatchStatus::Found => match update.snapshot {
                Some(snapshot) => {
                    let color = match update.assigned_color.or(self.preferred_color) {
                        Some(color) => color,
                        None => {
                            warn!(%ticket_id, fallback = %self.fallback_color, "FOUND without an assigned color");
                            self.fallback_color
                        }
                    };
                    info!(%ticket_id, session = snapshot.session_id(), ?color, "match found");
                    self.state = MatchState::Found { ticket_id };
                    MatchTransition::Found { snapshot, color }
                }
                None => {
                    warn!(%ticket_id, "FOUND without a game session, still waiting");
                    MatchTransition::StillQueued
                }
            },
            MatchStatus::Canceled => {
                info!(%ticket_id, "matchmaking canceled by the service");
                self.state = MatchState::Canceled { ticket_id };
                MatchTransition::Canceled
            }
            MatchStatus::Expired => {
                info!(%ticket_id, "matchmaking ticket expired");
                self.state = MatchState::Expired { ticket_id };
                MatchTransition::Expired
            }
        }
    }

    /// User-initiated cancel. Returns the ticket to cancel remotely, or
    /// `None` when nothing is queued.
    pub fn cancel(&mut self) -> Option<String> {
        let MatchState::Queued { ticket_id } = &self.state else {
            return None;
        };
        let ticket_id = ticket_id.clone();
        self.state = MatchState::Canceled {
            ticket_id: ticket_id.clone(),
        };
        Some(ticket_id)
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
    use crate::protocol::MatchStatusPayload;

    fn update(json: serde_json::Value) -> MatchUpdate {
        let payload: MatchStatusPayload = serde_json::from_value(json).unwrap();
        MatchUpdate::try_from(payload).unwrap()
    }

    fn found() -> MatchUpdate {
        update(serde_json::json!({
            "status": "FOUND",
            "assignedColor": "BLACK",
            "gameSession": {
                "sessionId": "g-7",
                "board": {"boardCells": [["-", "B"], ["W", "-"]]},
                "currentPlayerColor": "BLACK",
                "gameState": "IN_PROGRESS"
            }
        }))
    }

    #[test]
    fn found_twice_transitions_once() {
        let mut mm = Matchmaker::new(PlayerColor::White);
        mm.enqueued("abc123", None);

        let MatchTransition::Found { snapshot, color } = mm.apply("abc123", found()) else {
            panic!("expected Found");
        };
        assert_eq!(snapshot.session_id(), "g-7");
        assert_eq!(color, PlayerColor::Black);
        assert_eq!(mm.apply("abc123", found()), MatchTransition::Ignored);
        assert_eq!(
            mm.state(),
            &MatchState::Found {
                ticket_id: "abc123".into()
            }
        );
        assert_eq!(mm.ticket_id(), None);
    }

    #[test]
    fn waiting_keeps_ticket_live() {
        let mut mm = Matchmaker::new(PlayerColor::White);
        mm.enqueued("t1", Some(PlayerColor::White));
        assert_eq!(
            mm.apply("t1", update(serde_json::json!({"status": "waiting"}))),
            MatchTransition::StillQueued
        );
        assert_eq!(mm.ticket_id(), Some("t1"));
    }

    #[test]
    fn found_without_session_is_not_terminal() {
        let mut mm = Matchmaker::new(PlayerColor::White);
        mm.enqueued("t1", None);
        assert_eq!(
            mm.apply("t1", update(serde_json::json!({"status": "FOUND"}))),
            MatchTransition::StillQueued
        );
        assert!(mm.is_queued());
    }

    #[test]
    fn missing_assigned_color_falls_back_to_preference() {
        let mut mm = Matchmaker::new(PlayerColor::Black);
        mm.enqueued("t1", Some(PlayerColor::White));
        let mut u = found();
        u.assigned_color = None;
        let MatchTransition::Found { color, .. } = mm.apply("t1", u) else {
            panic!("expected Found");
        };
        assert_eq!(color, PlayerColor::White);
    }

    #[test]
    fn no_assigned_color_and_no_preference_uses_fallback() {
        let mut mm = Matchmaker::new(PlayerColor::Black);
        mm.enqueued("t1", None);
        let mut u = found();
        u.assigned_color = None;
        let MatchTransition::Found { color, .. } = mm.apply("t1", u) else {
            panic!("expected Found");
        };
        assert_eq!(color, PlayerColor::Black);
    }

    #[test]
    fn updates_for_other_tickets_are_ignored() {
        let mut mm = Matchmaker::new(PlayerColor::White);
        assert_eq!(mm.apply("t1", found()), MatchTransition::Ignored);
        mm.enqueued("t2", None);
        assert_eq!(mm.apply("t1", found()), MatchTransition::Ignored);
        assert!(mm.is_queued());
    }

    #[test]
    fn server_reported_terminal_states() {
        let mut mm = Matchmaker::new(PlayerColor::White);
        mm.enqueued("t1", None);
        assert_eq!(
            mm.apply("t1", update(serde_json::json!({"status": "CANCELLED"}))),
            MatchTransition::Canceled
        );

        mm.enqueued("t2", None);
        assert_eq!(
            mm.apply("t2", update(serde_json::json!({"status": "EXPIRED"}))),
            MatchTransition::Expired
        );
        assert_eq!(mm.apply("t2", found()), MatchTransition::Ignored);
    }

    #[test]
    fn cancel_without_ticket_is_a_no_op() {
        let mut mm = Matchmaker::new(PlayerColor::White);
        assert_eq!(mm.cancel(), None);
        mm.enqueued("t1", None);
        assert_eq!(mm.cancel().as_deref(), Some("t1"));
        assert_eq!(mm.cancel(), None);
        assert_eq!(mm.apply("t1", found()), MatchTransition::Ignored);
    }
}
