//! Wire-compatible protocol types for the Reversi game and matchmaking service.
//!
//! Every struct in this module mirrors the JSON the service produces or
//! accepts (camelCase field names). Strings that the service emits with
//! inconsistent casing (`"Black"`, `"WHITE"`, `"waiting"`) are kept raw here
//! and parsed exactly once into the enumerated types below, either by
//! [`SessionSnapshot`](crate::snapshot::SessionSnapshot) or by
//! [`MatchUpdate`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ReversiError, Result};
use crate::snapshot::SessionSnapshot;

// ── Enums ───────────────────────────────────────────────────────────

/// One of the two sides of a Reversi board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerColor {
    White,
    Black,
}

impl PlayerColor {
    /// The canonical upper-case wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::White => "WHITE",
            Self::Black => "BLACK",
        }
    }

    /// The other side.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }

    /// Parse a color leniently, returning `None` for placeholders like `"N/A"`.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

impl FromStr for PlayerColor {
    type Err = ReversiError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("white") {
            Ok(Self::White)
        } else if trimmed.eq_ignore_ascii_case("black") {
            Ok(Self::Black)
        } else {
            Err(ReversiError::InvalidInput(format!("unknown player color {s:?}")))
        }
    }
}

impl fmt::Display for PlayerColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PlayerColor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PlayerColor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Kind of game session to create.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameType {
    /// Two humans; creation requires an authenticated account.
    PlayerVsPlayer,
    /// Human against the server-side engine; no account required.
    PlayerVsComputer,
}

impl GameType {
    /// The wire name used in query strings.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlayerVsPlayer => "PLAYER_VS_PLAYER",
            Self::PlayerVsComputer => "PLAYER_VS_COMPUTER",
        }
    }

    /// Whether creating a session of this type needs an authenticated user.
    pub fn requires_auth(self) -> bool {
        matches!(self, Self::PlayerVsPlayer)
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a matchmaking ticket as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchStatus {
    /// Waiting in the queue (`WAITING` or `QUEUED` on the wire).
    Queued,
    Found,
    Canceled,
    Expired,
}

impl MatchStatus {
    /// Whether the status ends the ticket's lifecycle.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Queued)
    }
}

impl FromStr for MatchStatus {
    type Err = ReversiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WAITING" | "QUEUED" => Ok(Self::Queued),
            "FOUND" => Ok(Self::Found),
            "CANCELED" | "CANCELLED" => Ok(Self::Canceled),
            "EXPIRED" => Ok(Self::Expired),
            _ => Err(ReversiError::InvalidInput(format!(
                "unknown matchmaking status {s:?}"
            ))),
        }
    }
}

// ── Session summary ─────────────────────────────────────────────────

/// Board grid as sent by the service: rows of `"B"`, `"W"` or an empty marker.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BoardPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_cells: Option<Vec<Vec<String>>>,
}

/// Raw session summary, the service's view of one game session.
///
/// Convert with [`SessionSnapshot::try_from`] before use; that conversion is
/// where a malformed board is rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board: Option<BoardPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub black_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub white_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_player_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_state: Option<String>,
    #[serde(default)]
    pub finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_type: Option<String>,
    /// Seat colors in seat order; empty seats are reported as `"N/A"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_colors: Option<Vec<String>>,
    /// Display names aligned with `player_colors`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_nicknames: Option<Vec<Option<String>>>,
}

/// Body of a `game-progress/{sessionId}` push and of the move endpoint's reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_summary: Option<SessionSummary>,
}

// ── Moves ───────────────────────────────────────────────────────────

/// A board coordinate, as returned by the possible-moves endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Move {
    pub row: usize,
    pub column: usize,
}

impl Move {
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

/// Body of `POST session/{id}/moves`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub session_id: String,
    pub row: usize,
    pub column: usize,
    pub color: PlayerColor,
    /// Asks the service to pass the turn instead of placing a piece.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pass: bool,
}

// ── Matchmaking ─────────────────────────────────────────────────────

/// Body of `POST matchmaking/enqueue`. `None` serializes as `null`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub preferred_color: Option<PlayerColor>,
}

/// Raw matchmaking status, delivered both by poll and by push.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MatchStatusPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_session: Option<SessionSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_color: Option<String>,
}

/// A parsed matchmaking update.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchUpdate {
    pub status: MatchStatus,
    pub snapshot: Option<SessionSnapshot>,
    pub assigned_color: Option<PlayerColor>,
}

impl TryFrom<MatchStatusPayload> for MatchUpdate {
    type Error = ReversiError;

    fn try_from(payload: MatchStatusPayload) -> Result<Self> {
        let raw = payload
            .status
            .ok_or_else(|| ReversiError::InvalidInput("matchmaking update without status".into()))?;
        let status: MatchStatus = raw.parse()?;
        let snapshot = payload
            .game_session
            .map(SessionSnapshot::try_from)
            .transpose()?;
        let assigned_color = payload
            .assigned_color
            .as_deref()
            .and_then(PlayerColor::parse_lenient);
        Ok(Self {
            status,
            snapshot,
            assigned_color,
        })
    }
}

// ── Auth ────────────────────────────────────────────────────────────

/// Identity returned by the auth-check endpoint. Extra fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
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

    #[test]
    fn color_parsing_is_case_insensitive() {
        assert_eq!("Black".parse::<PlayerColor>().unwrap(), PlayerColor::Black);
        assert_eq!(" white ".parse::<PlayerColor>().unwrap(), PlayerColor::White);
        assert_eq!(PlayerColor::parse_lenient("N/A"), None);
    }

    #[test]
    fn color_serializes_upper_case() {
        let json = serde_json::to_string(&PlayerColor::Black).unwrap();
        assert_eq!(json, "\"BLACK\"");
        let back: PlayerColor = serde_json::from_str("\"black\"").unwrap();
        assert_eq!(back, PlayerColor::Black);
    }

    #[test]
    fn status_aliases() {
        assert_eq!("WAITING".parse::<MatchStatus>().unwrap(), MatchStatus::Queued);
        assert_eq!("cancelled".parse::<MatchStatus>().unwrap(), MatchStatus::Canceled);
        assert!("SOMETHING".parse::<MatchStatus>().is_err());
        assert!(!MatchStatus::Queued.is_terminal());
        assert!(MatchStatus::Expired.is_terminal());
    }

    #[test]
    fn move_request_omits_pass_when_false() {
        let req = MoveRequest {
            session_id: "s1".into(),
            row: 2,
            column: 3,
            color: PlayerColor::White,
            pass: false,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"sessionId": "s1", "row": 2, "column": 3, "color": "WHITE"})
        );
    }

    #[test]
    fn enqueue_without_preference_sends_null() {
        let value = serde_json::to_value(EnqueueRequest::default()).unwrap();
        assert_eq!(value, serde_json::json!({"preferredColor": null}));
    }

    #[test]
    fn match_update_parses_found_payload() {
        let payload: MatchStatusPayload = serde_json::from_value(serde_json::json!({
            "status": "FOUND",
            "assignedColor": "black",
            "gameSession": {
                "sessionId": "g-1",
                "board": {"boardCells": [["-", "B"], ["W", "-"]]},
                "currentPlayerColor": "Black",
                "gameState": "IN_PROGRESS"
            }
        }))
        .unwrap();
        let update = MatchUpdate::try_from(payload).unwrap();
        assert_eq!(update.status, MatchStatus::Found);
        assert_eq!(update.assigned_color, Some(PlayerColor::Black));
        assert_eq!(update.snapshot.unwrap().session_id(), "g-1");
    }

    #[test]
    fn match_update_without_status_is_rejected() {
        let err = MatchUpdate::try_from(MatchStatusPayload::default()).unwrap_err();
        assert!(matches!(err, ReversiError::InvalidInput(_)));
    }

    #[test]
    fn session_summary_tolerates_nulls() {
        let summary: SessionSummary = serde_json::from_str(
            r#"{"sessionId":"x","board":null,"playerColors":null,"blackScore":null}"#,
        )
        .unwrap();
        assert_eq!(summary.session_id.as_deref(), Some("x"));
        assert!(summary.board.is_none());
        assert!(summary.player_colors.is_none());
    }
}
