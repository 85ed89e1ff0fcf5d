//! Session View Model: the single authoritative snapshot plus the render
//! sequence used to discard stale asynchronous results.

use std::fmt;

use crate::protocol::PlayerColor;
use crate::snapshot::SessionSnapshot;

/// A strictly increasing render-sequence number.
///
/// A result computed for token `T` may only be applied while
/// [`SessionViewModel::is_current`] still returns `true` for `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RenderToken(u64);

impl RenderToken {
    pub fn value(self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for RenderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Owns the current snapshot and the local player's color.
#[derive(Debug, Default)]
pub struct SessionViewModel {
    snapshot: Option<SessionSnapshot>,
    token: RenderToken,
    client_color: Option<PlayerColor>,
}

impl SessionViewModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot wholesale and return the fresh render token.
    pub fn set_snapshot(&mut self, snapshot: SessionSnapshot) -> RenderToken {
        self.snapshot = Some(snapshot);
        self.token = self.token.next();
        self.token
    }

    pub fn current_snapshot(&self) -> Option<&SessionSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn current_token(&self) -> RenderToken {
        self.token
    }

    /// Whether no newer snapshot has been adopted since `token` was issued.
    pub fn is_current(&self, token: RenderToken) -> bool {
        self.token == token
    }

    pub fn client_color(&self) -> Option<PlayerColor> {
        self.client_color
    }

    pub fn set_client_color(&mut self, color: Option<PlayerColor>) {
        self.client_color = color;
    }

    /// Drop the snapshot and client color. The token still advances so any
    /// in-flight result is discarded.
    pub fn clear(&mut self) {
        self.snapshot = None;
        self.client_color = None;
        self.token = self.token.next();
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

    fn snapshot(id: &str) -> SessionSnapshot {
        let summary: SessionSummary = serde_json::from_value(serde_json::json!({
            "sessionId": id,
            "board": {"boardCells": [["-", "B"], ["W", "-"]]},
            "currentPlayerColor": "BLACK",
            "gameState": "IN_PROGRESS"
        }))
        .unwrap();
        SessionSnapshot::try_from(summary).unwrap()
    }

    #[test]
    fn tokens_strictly_increase() {
        let mut vm = SessionViewModel::new();
        let t1 = vm.set_snapshot(snapshot("a"));
        let t2 = vm.set_snapshot(snapshot("a"));
        assert!(t2 > t1);
        assert!(vm.is_current(t2));
        assert!(!vm.is_current(t1));
        assert_eq!(vm.current_token(), t2);
    }

    #[test]
    fn latest_snapshot_wins() {
        let mut vm = SessionViewModel::new();
        vm.set_snapshot(snapshot("a"));
        vm.set_snapshot(snapshot("b"));
        assert_eq!(vm.current_snapshot().unwrap().session_id(), "b");
    }

    #[test]
    fn clear_invalidates_outstanding_tokens() {
        let mut vm = SessionViewModel::new();
        vm.set_client_color(Some(PlayerColor::White));
        let t = vm.set_snapshot(snapshot("a"));
        vm.clear();
        assert!(!vm.is_current(t));
        assert!(vm.current_snapshot().is_none());
        assert_eq!(vm.client_color(), None);
    }
}
