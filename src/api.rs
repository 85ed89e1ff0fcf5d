//! Typed calls for every endpoint of the game and matchmaking service.
//!
//! Calls that need a logged-in user (session create/join, enqueue,
//! auth-check) go through the [`AuthGateway`] and accept the
//! [`PendingIntent`] to save if the service demands a login. The remaining
//! calls hit the backend directly and surface non-2xx statuses as
//! [`ReversiError::Http`].

use std::sync::Arc;

use tracing::debug;

use crate::error::{ReversiError, Result};
use crate::gateway::AuthGateway;
use crate::http::{encode_component, HttpRequest};
use crate::intent::PendingIntent;
use crate::protocol::{
    AuthIdentity, EnqueueRequest, GameProgress, GameType, MatchStatusPayload, MatchUpdate, Move,
    MoveRequest, PlayerColor, SessionSummary,
};
use crate::snapshot::SessionSnapshot;

/// Builds service paths under an optional prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiPaths {
    prefix: String,
}

impl ApiPaths {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn sessions(&self) -> String {
        format!("{}/api/v1/sessions", self.prefix)
    }

    pub fn join(&self, session_id: &str) -> String {
        format!("{}/{}/join", self.sessions(), encode_component(session_id))
    }

    pub fn moves(&self, session_id: &str) -> String {
        format!("{}/{}/moves", self.sessions(), encode_component(session_id))
    }

    pub fn possible_moves(&self, session_id: &str) -> String {
        format!(
            "{}/{}/possible-moves",
            self.sessions(),
            encode_component(session_id)
        )
    }

    pub fn enqueue(&self) -> String {
        format!("{}/api/matchmaking/enqueue", self.prefix)
    }

    pub fn match_status(&self, ticket_id: &str) -> String {
        format!("{}/api/matchmaking/{}", self.prefix, encode_component(ticket_id))
    }

    pub fn cancel(&self, ticket_id: &str) -> String {
        format!(
            "{}/api/matchmaking/cancel/{}",
            self.prefix,
            encode_component(ticket_id)
        )
    }

    pub fn auth_check(&self) -> String {
        format!("{}/api/matchmaking/auth-check", self.prefix)
    }
}

/// Client for the remote game and matchmaking service.
#[derive(Debug, Clone)]
pub struct GameApi {
    gateway: Arc<AuthGateway>,
    paths: ApiPaths,
}

impl GameApi {
    pub fn new(gateway: Arc<AuthGateway>, paths: ApiPaths) -> Self {
        Self { gateway, paths }
    }

    pub fn gateway(&self) -> &Arc<AuthGateway> {
        &self.gateway
    }

    /// `POST sessions?gameType&color`.
    ///
    /// # Errors
    ///
    /// Gateway, HTTP, decode or snapshot-validation failures.
    pub async fn create_session(
        &self,
        game_type: GameType,
        color: PlayerColor,
        intent: Option<PendingIntent>,
    ) -> Result<SessionSnapshot> {
        let request = HttpRequest::post(self.paths.sessions())
            .with_query("gameType", game_type.as_str())
            .with_query("color", color.as_str());
        let response = self
            .gateway
            .auth_fetch(request, intent)
            .await?
            .ensure_success("create session")?;
        SessionSnapshot::try_from(response.json::<SessionSummary>()?)
    }

    /// `POST sessions/{id}/join`.
    ///
    /// # Errors
    ///
    /// Gateway, HTTP, decode or snapshot-validation failures.
    pub async fn join_session(
        &self,
        session_id: &str,
        intent: Option<PendingIntent>,
    ) -> Result<SessionSnapshot> {
        let response = self
            .gateway
            .auth_fetch(HttpRequest::post(self.paths.join(session_id)), intent)
            .await?
            .ensure_success("join session")?;
        SessionSnapshot::try_from(response.json::<SessionSummary>()?)
    }

    /// `POST sessions/{id}/moves`. The returned acknowledgement is
    /// informational; the authoritative state arrives by push.
    ///
    /// # Errors
    ///
    /// HTTP or decode failures.
    pub async fn submit_move(&self, request: &MoveRequest) -> Result<GameProgress> {
        let http = HttpRequest::post(self.paths.moves(&request.session_id)).with_json(request)?;
        let response = self
            .gateway
            .backend()
            .execute(http)
            .await?
            .ensure_success("submit move")?;
        if response.body.trim().is_empty() {
            return Ok(GameProgress::default());
        }
        response.json()
    }

    /// `GET sessions/{id}/possible-moves?color`.
    ///
    /// # Errors
    ///
    /// HTTP or decode failures.
    pub async fn possible_moves(&self, session_id: &str, color: PlayerColor) -> Result<Vec<Move>> {
        let request =
            HttpRequest::get(self.paths.possible_moves(session_id)).with_query("color", color.as_str());
        let response = self
            .gateway
            .backend()
            .execute(request)
            .await?
            .ensure_success("fetch possible moves")?;
        response.json()
    }

    /// `POST matchmaking/enqueue`, returning the ticket id.
    ///
    /// # Errors
    ///
    /// Gateway or HTTP failures, or an empty ticket id.
    pub async fn enqueue(
        &self,
        preferred_color: Option<PlayerColor>,
        intent: Option<PendingIntent>,
    ) -> Result<String> {
        let request =
            HttpRequest::post(self.paths.enqueue()).with_json(&EnqueueRequest { preferred_color })?;
        let response = self
            .gateway
            .auth_fetch(request, intent)
            .await?
            .ensure_success("enqueue")?;
        // The service answers with a JSON string; tolerate a bare body too.
        let ticket = response
            .json::<String>()
            .unwrap_or_else(|_| response.body.clone());
        let ticket = ticket.trim().trim_matches('"').trim().to_string();
        if ticket.is_empty() {
            return Err(ReversiError::Network("enqueue returned an empty ticket id".into()));
        }
        debug!(%ticket, "enqueued for matchmaking");
        Ok(ticket)
    }

    /// `GET matchmaking/{ticketId}`.
    ///
    /// # Errors
    ///
    /// HTTP or decode failures, an unknown status, or a malformed session.
    pub async fn match_status(&self, ticket_id: &str) -> Result<MatchUpdate> {
        let response = self
            .gateway
            .backend()
            .execute(HttpRequest::get(self.paths.match_status(ticket_id)))
            .await?
            .ensure_success("matchmaking status")?;
        MatchUpdate::try_from(response.json::<MatchStatusPayload>()?)
    }

    /// `DELETE matchmaking/cancel/{ticketId}`.
    ///
    /// # Errors
    ///
    /// HTTP failures; callers treat cancellation as best-effort.
    pub async fn cancel(&self, ticket_id: &str) -> Result<()> {
        self.gateway
            .backend()
            .execute(HttpRequest::delete(self.paths.cancel(ticket_id)))
            .await?
            .ensure_success("cancel matchmaking")?;
        Ok(())
    }

    /// `GET auth-check` through the gateway.
    ///
    /// # Errors
    ///
    /// See [`AuthGateway::require_auth`].
    pub async fn auth_check(&self, intent: Option<PendingIntent>) -> Result<AuthIdentity> {
        self.gateway.require_auth(intent).await
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

    #[test]
    fn paths_follow_service_layout() {
        let paths = ApiPaths::default();
        assert_eq!(paths.sessions(), "/api/v1/sessions");
        assert_eq!(paths.join("abc"), "/api/v1/sessions/abc/join");
        assert_eq!(paths.moves("abc"), "/api/v1/sessions/abc/moves");
        assert_eq!(
            paths.possible_moves("abc"),
            "/api/v1/sessions/abc/possible-moves"
        );
        assert_eq!(paths.enqueue(), "/api/matchmaking/enqueue");
        assert_eq!(paths.match_status("t1"), "/api/matchmaking/t1");
        assert_eq!(paths.cancel("t1"), "/api/matchmaking/cancel/t1");
        assert_eq!(paths.auth_check(), "/api/matchmaking/auth-check");
    }

    #[test]
    fn prefix_is_normalised_and_ids_are_encoded() {
        let paths = ApiPaths::new("/reversi/");
        assert_eq!(paths.join("a b"), "/reversi/api/v1/sessions/a%20b/join");
    }
}
