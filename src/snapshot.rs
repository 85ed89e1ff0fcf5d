//! The validated, immutable view of one game session.
//!
//! A [`SessionSnapshot`] is built from a raw [`SessionSummary`] once, at the
//! boundary where the summary arrives. After that, no code needs to
//! re-check board shape or normalise color strings.

use crate::error::{ReversiError, Result};
use crate::protocol::{GameType, PlayerColor, SessionSummary};

/// State of a single board square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Cell {
    #[default]
    Empty,
    Black,
    White,
}

impl Cell {
    fn from_wire(raw: &str) -> Self {
        match raw.trim() {
            "B" | "b" => Self::Black,
            "W" | "w" => Self::White,
            _ => Self::Empty,
        }
    }

    /// The color of the piece on this square, if any.
    pub fn color(self) -> Option<PlayerColor> {
        match self {
            Self::Empty => None,
            Self::Black => Some(PlayerColor::Black),
            Self::White => Some(PlayerColor::White),
        }
    }
}

/// A rectangular, non-empty grid of cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    rows: Vec<Vec<Cell>>,
    columns: usize,
}

impl Board {
    /// Build a board, rejecting empty or ragged grids.
    pub fn new(rows: Vec<Vec<Cell>>) -> Result<Self> {
        let columns = rows.first().map(Vec::len).unwrap_or(0);
        if rows.is_empty() || columns == 0 {
            return Err(ReversiError::MalformedSnapshot("board has no cells".into()));
        }
        if let Some((index, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns) {
            return Err(ReversiError::MalformedSnapshot(format!(
                "board row {index} has {} cells, expected {columns}",
                row.len()
            )));
        }
        Ok(Self { rows, columns })
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns
    }

    /// The cell at `(row, column)`, or `None` when out of range.
    pub fn get(&self, row: usize, column: usize) -> Option<Cell> {
        self.rows.get(row).and_then(|r| r.get(column)).copied()
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Number of pieces of `color` on the board.
    pub fn count(&self, color: PlayerColor) -> u32 {
        let total = self
            .rows
            .iter()
            .flatten()
            .filter(|cell| cell.color() == Some(color))
            .count();
        u32::try_from(total).unwrap_or(u32::MAX)
    }
}

/// How a finished game ended.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Outcome {
    WhiteWins,
    BlackWins,
    Tie,
    /// A terminal state the client does not recognise, kept verbatim.
    Other(String),
}

impl Outcome {
    fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "WHITE_WINS" => Self::WhiteWins,
            "BLACK_WINS" => Self::BlackWins,
            "TIE" | "DRAW" => Self::Tie,
            _ => Self::Other(raw.to_string()),
        }
    }

    /// The winning color, if there is one.
    pub fn winner(&self) -> Option<PlayerColor> {
        match self {
            Self::WhiteWins => Some(PlayerColor::White),
            Self::BlackWins => Some(PlayerColor::Black),
            Self::Tie | Self::Other(_) => None,
        }
    }
}

/// Lifecycle of the game itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameState {
    InProgress,
    Finished(Outcome),
}

/// One occupied seat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatedPlayer {
    pub color: PlayerColor,
    pub display_name: Option<String>,
}

/// The full authoritative state of one game session at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    session_id: String,
    board: Board,
    black_score: u32,
    white_score: u32,
    current_turn: Option<PlayerColor>,
    state: GameState,
    players: Vec<SeatedPlayer>,
    game_type: Option<GameType>,
}

impl SessionSnapshot {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Score for one side.
    pub fn score(&self, color: PlayerColor) -> u32 {
        match color {
            PlayerColor::Black => self.black_score,
            PlayerColor::White => self.white_score,
        }
    }

    /// Color whose turn it is; `None` when the service reports no current player.
    pub fn current_turn(&self) -> Option<PlayerColor> {
        self.current_turn
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn players(&self) -> &[SeatedPlayer] {
        &self.players
    }

    pub fn game_type(&self) -> Option<GameType> {
        self.game_type
    }

    /// The outcome, when the game has finished.
    pub fn outcome(&self) -> Option<&Outcome> {
        match &self.state {
            GameState::InProgress => None,
            GameState::Finished(outcome) => Some(outcome),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, GameState::Finished(_))
    }

    /// Whether it is `color`'s turn in an in-progress game.
    pub fn is_turn_of(&self, color: Option<PlayerColor>) -> bool {
        !self.is_terminal() && color.is_some() && self.current_turn == color
    }

    /// Display name for a side, falling back to "Black Player" / "White Player".
    pub fn display_name(&self, color: PlayerColor) -> String {
        self.players
            .iter()
            .find(|p| p.color == color)
            .and_then(|p| p.display_name.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| match color {
                PlayerColor::Black => "Black Player".to_string(),
                PlayerColor::White => "White Player".to_string(),
            })
    }
}

impl TryFrom<SessionSummary> for SessionSnapshot {
    type Error = ReversiError;

    fn try_from(summary: SessionSummary) -> Result<Self> {
        let session_id = summary
            .session_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ReversiError::MalformedSnapshot("missing session id".into()))?;
        let raw_cells = summary
            .board
            .and_then(|b| b.board_cells)
            .ok_or_else(|| ReversiError::MalformedSnapshot("missing board cells".into()))?;
        let board = Board::new(
            raw_cells
                .iter()
                .map(|row| row.iter().map(|c| Cell::from_wire(c)).collect())
                .collect(),
        )?;

        let state = match summary.game_state.as_deref().map(str::trim) {
            Some(raw) if raw.eq_ignore_ascii_case("IN_PROGRESS") => GameState::InProgress,
            Some(raw) if !raw.is_empty() => GameState::Finished(Outcome::from_wire(raw)),
            _ if summary.finished => GameState::Finished(Outcome::Other("FINISHED".into())),
            _ => GameState::InProgress,
        };

        let names = summary.player_nicknames.unwrap_or_default();
        let players = summary
            .player_colors
            .unwrap_or_default()
            .iter()
            .enumerate()
            .filter_map(|(seat, raw)| {
                PlayerColor::parse_lenient(raw).map(|color| SeatedPlayer {
                    color,
                    display_name: names.get(seat).cloned().flatten(),
                })
            })
            .collect();

        let game_type = summary
            .game_type
            .and_then(|raw| serde_json::from_value(serde_json::Value::String(raw)).ok());

        Ok(Self {
            session_id,
            black_score: summary
                .black_score
                .unwrap_or_else(|| board.count(PlayerColor::Black)),
            white_score: summary
                .white_score
                .unwrap_or_else(|| board.count(PlayerColor::White)),
            board,
            current_turn: summary
                .current_player_color
                .as_deref()
                .and_then(PlayerColor::parse_lenient),
            state,
            players,
            game_type,
        })
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
    use crate::protocol::BoardPayload;

    fn summary(cells: Vec<Vec<&str>>) -> SessionSummary {
        SessionSummary {
            session_id: Some("s-1".into()),
            board: Some(BoardPayload {
                board_cells: Some(
                    cells
                        .into_iter()
                        .map(|r| r.into_iter().map(String::from).collect())
                        .collect(),
                ),
            }),
            current_player_color: Some("Black".into()),
            game_state: Some("IN_PROGRESS".into()),
            player_colors: Some(vec!["White".into(), "Black".into()]),
            player_nicknames: Some(vec![Some("alice".into()), Some("  ".into())]),
            ..Default::default()
        }
    }

    #[test]
    fn converts_well_formed_summary() {
        let snap = SessionSnapshot::try_from(summary(vec![vec!["B", "-"], vec!["W", "W"]])).unwrap();
        assert_eq!(snap.session_id(), "s-1");
        assert_eq!(snap.board().num_rows(), 2);
        assert_eq!(snap.board().get(0, 0), Some(Cell::Black));
        assert_eq!(snap.board().get(0, 1), Some(Cell::Empty));
        assert_eq!(snap.board().get(5, 5), None);
        assert_eq!(snap.current_turn(), Some(PlayerColor::Black));
        assert_eq!(snap.score(PlayerColor::White), 2);
        assert_eq!(snap.score(PlayerColor::Black), 1);
        assert!(!snap.is_terminal());
    }

    #[test]
    fn display_names_fall_back_when_blank() {
        let snap = SessionSnapshot::try_from(summary(vec![vec!["-"]])).unwrap();
        assert_eq!(snap.display_name(PlayerColor::White), "alice");
        assert_eq!(snap.display_name(PlayerColor::Black), "Black Player");
    }

    #[test]
    fn rejects_ragged_board() {
        let err = SessionSnapshot::try_from(summary(vec![vec!["-", "-"], vec!["-"]])).unwrap_err();
        assert!(matches!(err, ReversiError::MalformedSnapshot(_)));
    }

    #[test]
    fn rejects_missing_board() {
        let mut raw = summary(vec![vec!["-"]]);
        raw.board = Some(BoardPayload { board_cells: None });
        assert!(matches!(
            SessionSnapshot::try_from(raw),
            Err(ReversiError::MalformedSnapshot(_))
        ));
    }

    #[test]
    fn rejects_missing_session_id() {
        let mut raw = summary(vec![vec!["-"]]);
        raw.session_id = Some("   ".into());
        assert!(SessionSnapshot::try_from(raw).is_err());
    }

    #[test]
    fn terminal_states_are_recognised() {
        let mut raw = summary(vec![vec!["W"]]);
        raw.game_state = Some("WHITE_WINS".into());
        let snap = SessionSnapshot::try_from(raw).unwrap();
        assert_eq!(snap.outcome(), Some(&Outcome::WhiteWins));
        assert!(!snap.is_turn_of(Some(PlayerColor::Black)));

        let mut raw = summary(vec![vec!["W"]]);
        raw.game_state = None;
        raw.finished = true;
        assert!(SessionSnapshot::try_from(raw).unwrap().is_terminal());
    }

    #[test]
    fn placeholder_turn_color_means_nobody() {
        let mut raw = summary(vec![vec!["-"]]);
        raw.current_player_color = Some("N/A".into());
        let snap = SessionSnapshot::try_from(raw).unwrap();
        assert_eq!(snap.current_turn(), None);
        assert!(!snap.is_turn_of(Some(PlayerColor::White)));
        assert!(!snap.is_turn_of(None));
    }
}
