//! Turn Synchronizer.
//!
//! Turns a [`SessionSnapshot`] into a [`RenderPlan`]: the board to draw right
//! away, the outcome to announce if the game is over, and (only when it is
//! the local player's turn) the legal-move fetch to issue. When that fetch
//! completes, [`TurnSynchronizer::resolve`] decides what to do with it,
//! checking the render token first so a superseded result is never applied.
//!
//! The synchronizer performs no I/O; the session loop executes its plans.

use tracing::{debug, info, warn};

use crate::error::{ReversiError, Result};
use crate::protocol::{Move, MoveRequest, PlayerColor};
use crate::snapshot::{Cell, Outcome, SessionSnapshot};
use crate::view_model::{RenderToken, SessionViewModel};

/// What to do when it is the local player's turn and no legal move exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassPolicy {
    /// Render without highlights and wait for the next push.
    #[default]
    AwaitPush,
    /// Submit a move flagged `pass` on the local player's behalf.
    AutoPass,
}

/// Everything the presentation layer needs to draw one board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardView {
    pub session_id: String,
    pub token: RenderToken,
    pub cells: Vec<Vec<Cell>>,
    /// Squares the local player may play. Empty unless it is their turn.
    pub highlights: Vec<Move>,
    pub black_score: u32,
    pub white_score: u32,
    pub black_name: String,
    pub white_name: String,
    /// Whose turn the service says it is.
    pub active_color: Option<PlayerColor>,
    pub local_color: Option<PlayerColor>,
    pub outcome: Option<Outcome>,
}

impl BoardView {
    pub fn is_highlighted(&self, row: usize, column: usize) -> bool {
        self.highlights.contains(&Move::new(row, column))
    }

    pub fn is_local_turn(&self) -> bool {
        self.outcome.is_none() && self.local_color.is_some() && self.active_color == self.local_color
    }
}

/// A legal-move fetch to issue, tagged with the token captured at render time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegalMovesRequest {
    pub session_id: String,
    pub color: PlayerColor,
    pub token: RenderToken,
}

/// Result of planning one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPlan {
    /// Board without highlights, drawn unconditionally.
    pub view: BoardView,
    /// Set when the game has finished.
    pub outcome: Option<Outcome>,
    /// Set only when it is the local player's turn in a running game.
    pub legal_moves: Option<LegalMovesRequest>,
}

/// What to do with a completed legal-move fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnResolution {
    /// Redraw with these highlights.
    Highlight(BoardView),
    /// Submit this pass on the local player's behalf.
    Pass(MoveRequest),
    /// No legal moves; keep the plain board and wait for the next push.
    AwaitPush,
    /// The fetch failed; the plain board stays on screen.
    Unhighlighted,
    /// A newer snapshot superseded this fetch; drop the result.
    Stale,
}

/// Plans renders and legal-move fetches.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnSynchronizer {
    pass_policy: PassPolicy,
}

impl TurnSynchronizer {
    pub fn new(pass_policy: PassPolicy) -> Self {
        Self { pass_policy }
    }

    pub fn pass_policy(&self) -> PassPolicy {
        self.pass_policy
    }

    /// Plan the render for `snapshot` as seen by `local_color`.
    pub fn plan(
        &self,
        snapshot: &SessionSnapshot,
        local_color: Option<PlayerColor>,
        token: RenderToken,
    ) -> RenderPlan {
        let view = render(snapshot, local_color, token, Vec::new());
        let outcome = snapshot.outcome().cloned();
        if let Some(outcome) = &outcome {
            info!(session = snapshot.session_id(), ?outcome, "game finished");
        }

        let legal_moves = match local_color {
            Some(color) if snapshot.is_turn_of(Some(color)) => Some(LegalMovesRequest {
                session_id: snapshot.session_id().to_string(),
                color,
                token,
            }),
            _ => {
                debug!(
                    session = snapshot.session_id(),
                    turn = ?snapshot.current_turn(),
                    local = ?local_color,
                    "not the local turn, no legal-move fetch"
                );
                None
            }
        };

        RenderPlan {
            view,
            outcome,
            legal_moves,
        }
    }

    /// Decide what a completed legal-move fetch means now.
    pub fn resolve(
        &self,
        view_model: &SessionViewModel,
        request: &LegalMovesRequest,
        result: Result<Vec<Move>>,
    ) -> TurnResolution {
        if !view_model.is_current(request.token) {
            debug!(
                token = %request.token,
                current = %view_model.current_token(),
                "discarding stale legal-move result"
            );
            return TurnResolution::Stale;
        }
        let Some(snapshot) = view_model.current_snapshot() else {
            return TurnResolution::Stale;
        };

        let moves = match result {
            Ok(moves) => moves,
            Err(e) => {
                warn!(session = %request.session_id, "legal-move fetch failed: {e}");
                return TurnResolution::Unhighlighted;
            }
        };

        let board = snapshot.board();
        let mut highlights: Vec<Move> = moves
            .into_iter()
            .filter(|m| board.get(m.row, m.column).is_some())
            .collect();
        highlights.sort_unstable();
        highlights.dedup();

        if highlights.is_empty() {
            return match self.pass_policy {
                PassPolicy::AwaitPush => {
                    info!(
                        session = %request.session_id,
                        color = %request.color,
                        "no legal moves, awaiting next update"
                    );
                    TurnResolution::AwaitPush
                }
                PassPolicy::AutoPass => {
                    info!(
                        session = %request.session_id,
                        color = %request.color,
                        "no legal moves, passing"
                    );
                    TurnResolution::Pass(MoveRequest {
                        session_id: request.session_id.clone(),
                        row: 0,
                        column: 0,
                        color: request.color,
                        pass: true,
                    })
                }
            };
        }

        TurnResolution::Highlight(render(
            snapshot,
            Some(request.color),
            request.token,
            highlights,
        ))
    }

    /// Build the move request for a click on (`row`, `column`).
    ///
    /// # Errors
    ///
    /// [`ReversiError::InvalidInput`] when there is no running game, the
    /// local color is unknown, it is not the local player's turn, or the
    /// square is off the board.
    pub fn move_request(
        &self,
        snapshot: Option<&SessionSnapshot>,
        local_color: Option<PlayerColor>,
        row: usize,
        column: usize,
    ) -> Result<MoveRequest> {
        let snapshot =
            snapshot.ok_or_else(|| ReversiError::InvalidInput("no active game session".into()))?;
        let color = local_color
            .ok_or_else(|| ReversiError::InvalidInput("local player color is unknown".into()))?;
        if !snapshot.is_turn_of(Some(color)) {
            return Err(ReversiError::InvalidInput(format!("not {color}'s turn")));
        }
        if snapshot.board().get(row, column).is_none() {
            return Err(ReversiError::InvalidInput(format!(
                "({row}, {column}) is off the board"
            )));
        }
        Ok(MoveRequest {
            session_id: snapshot.session_id().to_string(),
            row,
            column,
            color,
            pass: false,
        })
    }
}

fn render(
    snapshot: &SessionSnapshot,
    local_color: Option<PlayerColor>,
    token: RenderToken,
    highlights: Vec<Move>,
) -> BoardView {
    BoardView {
        session_id: snapshot.session_id().to_string(),
        token,
        cells: snapshot.board().rows().to_vec(),
        highlights,
        black_score: snapshot.score(PlayerColor::Black),
        white_score: snapshot.score(PlayerColor::White),
        black_name: snapshot.display_name(PlayerColor::Black),
        white_name: snapshot.display_name(PlayerColor::White),
        active_color: snapshot.current_turn(),
        local_color,
        outcome: snapshot.outcome().cloned(),
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
    use crate::protocol::SessionSummary;

    fn snapshot(turn: &str, state: &str) -> SessionSnapshot {
        let summary: SessionSummary = serde_json::from_value(serde_json::json!({
            "sessionId": "g1",
            "board": {"boardCells": [
                ["-", "-", "-", "-"],
                ["-", "W", "B", "-"],
                ["-", "B", "W", "-"],
                ["-", "-", "-", "-"]
            ]},
            "blackScore": 2,
            "whiteScore": 2,
            "currentPlayerColor": turn,
            "gameState": state,
            "playerColors": ["WHITE", "BLACK"],
            "playerNicknames": ["ann", null]
        }))
        .unwrap();
        SessionSnapshot::try_from(summary).unwrap()
    }

    #[test]
    fn opponent_turn_renders_without_fetch() {
        let sync = TurnSynchronizer::default();
        let plan = sync.plan(
            &snapshot("BLACK", "IN_PROGRESS"),
            Some(PlayerColor::White),
            RenderToken::default(),
        );
        assert!(plan.legal_moves.is_none());
        assert!(plan.view.highlights.is_empty());
        assert!(plan.outcome.is_none());
        assert_eq!(plan.view.white_name, "ann");
        assert_eq!(plan.view.black_name, "Black Player");
    }

    #[test]
    fn own_turn_requests_legal_moves_case_insensitively() {
        let mut vm = SessionViewModel::new();
        let token = vm.set_snapshot(snapshot("white", "IN_PROGRESS"));
        let plan = TurnSynchronizer::default().plan(
            vm.current_snapshot().unwrap(),
            Some(PlayerColor::White),
            token,
        );
        let request = plan.legal_moves.unwrap();
        assert_eq!(request.color, PlayerColor::White);
        assert_eq!(request.token, token);
        assert!(!plan.view.is_highlighted(0, 1));
    }

    #[test]
    fn finished_game_reports_outcome_and_skips_fetch() {
        let plan = TurnSynchronizer::default().plan(
            &snapshot("WHITE", "BLACK_WINS"),
            Some(PlayerColor::White),
            RenderToken::default(),
        );
        assert_eq!(plan.outcome, Some(Outcome::BlackWins));
        assert!(plan.legal_moves.is_none());
    }

    #[test]
    fn resolve_applies_current_result_and_drops_off_board_moves() {
        let mut vm = SessionViewModel::new();
        let token = vm.set_snapshot(snapshot("WHITE", "IN_PROGRESS"));
        let sync = TurnSynchronizer::default();
        let request = sync
            .plan(vm.current_snapshot().unwrap(), Some(PlayerColor::White), token)
            .legal_moves
            .unwrap();
        let resolution = sync.resolve(
            &vm,
            &request,
            Ok(vec![Move::new(0, 1), Move::new(9, 9), Move::new(0, 1)]),
        );
        let TurnResolution::Highlight(view) = resolution else {
            panic!("expected highlights, got {resolution:?}");
        };
        assert_eq!(view.highlights, vec![Move::new(0, 1)]);
        assert!(view.is_local_turn());
    }

    #[test]
    fn resolve_discards_superseded_result() {
        let mut vm = SessionViewModel::new();
        let sync = TurnSynchronizer::default();
        let t1 = vm.set_snapshot(snapshot("WHITE", "IN_PROGRESS"));
        let r1 = sync
            .plan(vm.current_snapshot().unwrap(), Some(PlayerColor::White), t1)
            .legal_moves
            .unwrap();
        let t2 = vm.set_snapshot(snapshot("WHITE", "IN_PROGRESS"));
        let r2 = sync
            .plan(vm.current_snapshot().unwrap(), Some(PlayerColor::White), t2)
            .legal_moves
            .unwrap();

        assert!(matches!(
            sync.resolve(&vm, &r2, Ok(vec![Move::new(0, 2)])),
            TurnResolution::Highlight(_)
        ));
        assert_eq!(
            sync.resolve(&vm, &r1, Ok(vec![Move::new(0, 1)])),
            TurnResolution::Stale
        );
    }

    #[test]
    fn fetch_failure_keeps_plain_board() {
        let mut vm = SessionViewModel::new();
        let token = vm.set_snapshot(snapshot("WHITE", "IN_PROGRESS"));
        let request = LegalMovesRequest {
            session_id: "g1".into(),
            color: PlayerColor::White,
            token,
        };
        let resolution = TurnSynchronizer::default().resolve(
            &vm,
            &request,
            Err(ReversiError::Network("connection reset".into())),
        );
        assert_eq!(resolution, TurnResolution::Unhighlighted);
    }

    #[test]
    fn empty_move_set_follows_pass_policy() {
        let mut vm = SessionViewModel::new();
        let token = vm.set_snapshot(snapshot("WHITE", "IN_PROGRESS"));
        let request = LegalMovesRequest {
            session_id: "g1".into(),
            color: PlayerColor::White,
            token,
        };
        assert_eq!(
            TurnSynchronizer::new(PassPolicy::AwaitPush).resolve(&vm, &request, Ok(vec![])),
            TurnResolution::AwaitPush
        );
        let TurnResolution::Pass(pass) =
            TurnSynchronizer::new(PassPolicy::AutoPass).resolve(&vm, &request, Ok(vec![]))
        else {
            panic!("expected a pass");
        };
        assert!(pass.pass);
        assert_eq!(pass.color, PlayerColor::White);
    }

    #[test]
    fn move_request_guards_turn_and_bounds() {
        let sync = TurnSynchronizer::default();
        let mine = snapshot("WHITE", "IN_PROGRESS");
        let req = sync
            .move_request(Some(&mine), Some(PlayerColor::White), 0, 1)
            .unwrap();
        assert_eq!((req.row, req.column, req.pass), (0, 1, false));

        assert!(sync
            .move_request(Some(&mine), Some(PlayerColor::Black), 0, 1)
            .is_err());
        assert!(sync
            .move_request(Some(&mine), Some(PlayerColor::White), 4, 0)
            .is_err());
        assert!(sync.move_request(None, Some(PlayerColor::White), 0, 0).is_err());
        assert!(sync.move_request(Some(&mine), None, 0, 0).is_err());
    }
}
