//! Authenticated-request gateway.
//!
//! Every call that needs a logged-in user goes through [`AuthGateway`]. When
//! the service answers "authentication required" the gateway saves the
//! caller's [`PendingIntent`], asks the [`Navigator`] to go to the login
//! surface with a `next` parameter pointing back at the current location,
//! and fails the call with [`ReversiError::AuthRedirected`].
//!
//! While a pending intent is being replayed (see [`AuthGateway::begin_replay`])
//! the gateway never saves a new intent, so a replay that bounces off the
//! login surface again cannot re-arm itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{ReversiError, Result};
use crate::http::{encode_component, HttpBackend, HttpRequest, HttpResponse};
use crate::intent::{PendingIntent, PendingIntentStore};
use crate::protocol::AuthIdentity;

/// Default login surface path.
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Where the user currently is, and how to send them elsewhere.
pub trait Navigator: Send + Sync + 'static {
    /// Current location as path + query + fragment, e.g. `/play?mode=pvp`.
    fn current_location(&self) -> String;

    /// Leave the current location for `url`.
    fn navigate(&self, url: &str);
}

/// Wraps an [`HttpBackend`] with login-redirect handling.
pub struct AuthGateway {
    backend: Arc<dyn HttpBackend>,
    store: PendingIntentStore,
    navigator: Arc<dyn Navigator>,
    login_path: String,
    auth_check_path: String,
    replaying: Arc<AtomicBool>,
}

impl AuthGateway {
    pub fn new(
        backend: Arc<dyn HttpBackend>,
        store: PendingIntentStore,
        navigator: Arc<dyn Navigator>,
        login_path: impl Into<String>,
        auth_check_path: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            store,
            navigator,
            login_path: login_path.into(),
            auth_check_path: auth_check_path.into(),
            replaying: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The raw backend, for calls that do not need authentication.
    pub fn backend(&self) -> &Arc<dyn HttpBackend> {
        &self.backend
    }

    pub fn store(&self) -> &PendingIntentStore {
        &self.store
    }

    /// Perform `request`; on "authentication required" save `intent`,
    /// redirect to login and fail.
    ///
    /// # Errors
    ///
    /// - [`ReversiError::AuthRedirected`] when a login redirect was started.
    /// - Any error from the backend itself.
    pub async fn auth_fetch(
        &self,
        request: HttpRequest,
        intent: Option<PendingIntent>,
    ) -> Result<HttpResponse> {
        debug!(method = request.method.as_str(), path = %request.path, "gateway request");
        let response = self.backend.execute(request).await?;
        if response.requires_auth(&self.login_path) {
            self.redirect_to_login(intent);
            return Err(ReversiError::AuthRedirected);
        }
        Ok(response)
    }

    /// Probe the auth-check endpoint and return the resolved identity.
    ///
    /// # Errors
    ///
    /// [`ReversiError::AuthRedirected`] when the user is not logged in (the
    /// redirect is already in flight); network or decode errors otherwise.
    pub async fn require_auth(&self, intent: Option<PendingIntent>) -> Result<AuthIdentity> {
        let response = self
            .auth_fetch(HttpRequest::get(self.auth_check_path.clone()), intent)
            .await?
            .ensure_success("auth check")?;
        let identity: AuthIdentity = response.json()?;
        debug!(username = ?identity.username, "auth check passed");
        Ok(identity)
    }

    /// Mark the start of a pending-intent replay.
    ///
    /// Returns `None` if a replay is already running. The returned guard
    /// clears the flag when dropped.
    pub fn begin_replay(&self) -> Option<ReplayGuard> {
        if self.replaying.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(ReplayGuard {
            flag: Arc::clone(&self.replaying),
        })
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying.load(Ordering::Acquire)
    }

    /// The login URL carrying the current location as `next`.
    pub fn login_url(&self) -> String {
        let next = self.navigator.current_location();
        format!("{}?next={}", self.login_path, encode_component(&next))
    }

    fn redirect_to_login(&self, intent: Option<PendingIntent>) {
        match intent {
            Some(_) if self.is_replaying() => {
                debug!("replay hit the login surface again; intent not re-saved");
            }
            Some(intent) => {
                if let Err(e) = self.store.save(&intent) {
                    warn!("failed to persist pending intent: {e}");
                }
            }
            None => {}
        }
        let url = self.login_url();
        info!(%url, "authentication required, redirecting to login");
        self.navigator.navigate(&url);
    }
}

impl std::fmt::Debug for AuthGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGateway")
            .field("login_path", &self.login_path)
            .field("auth_check_path", &self.auth_check_path)
            .field("replaying", &self.is_replaying())
            .finish()
    }
}

/// Clears the gateway's replay flag on drop.
#[derive(Debug)]
pub struct ReplayGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for ReplayGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
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
    use crate::intent::MemoryStorage;
    use crate::protocol::GameType;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FixedBackend {
        response: HttpResponse,
        calls: StdMutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl HttpBackend for FixedBackend {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.calls.lock().unwrap().push(request);
            Ok(self.response.clone())
        }
    }

    #[derive(Default)]
    struct RecordingNavigator {
        visited: StdMutex<Vec<String>>,
    }

    impl Navigator for RecordingNavigator {
        fn current_location(&self) -> String {
            "/play?mode=pvp".into()
        }

        fn navigate(&self, url: &str) {
            self.visited.lock().unwrap().push(url.to_string());
        }
    }

    fn gateway(response: HttpResponse) -> (AuthGateway, PendingIntentStore, Arc<RecordingNavigator>) {
        let backend = Arc::new(FixedBackend {
            response,
            calls: StdMutex::new(Vec::new()),
        });
        let store = PendingIntentStore::new(Arc::new(MemoryStorage::new()));
        let navigator = Arc::new(RecordingNavigator::default());
        let gw = AuthGateway::new(
            backend,
            store.clone(),
            navigator.clone(),
            DEFAULT_LOGIN_PATH,
            "/api/matchmaking/auth-check",
        );
        (gw, store, navigator)
    }

    fn create_intent() -> PendingIntent {
        PendingIntent::CreateSession {
            game_type: GameType::PlayerVsPlayer,
        }
    }

    #[tokio::test]
    async fn unauthorized_saves_intent_and_redirects() {
        let (gw, store, nav) = gateway(HttpResponse::new(401, ""));
        let err = gw
            .auth_fetch(HttpRequest::post("/api/v1/sessions"), Some(create_intent()))
            .await
            .unwrap_err();
        assert!(err.is_auth_redirect());
        assert_eq!(store.consume(), Some(create_intent()));
        assert_eq!(
            nav.visited.lock().unwrap().as_slice(),
            ["/login?next=%2Fplay%3Fmode%3Dpvp"]
        );
    }

    #[tokio::test]
    async fn redirect_to_login_page_counts_as_auth_required() {
        let (gw, store, nav) =
            gateway(HttpResponse::new(200, "<html/>").redirected("https://svc/login"));
        let err = gw
            .auth_fetch(HttpRequest::get("/x"), None)
            .await
            .unwrap_err();
        assert!(err.is_auth_redirect());
        assert!(!store.is_pending());
        assert_eq!(nav.visited.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn success_passes_through() {
        let (gw, store, nav) = gateway(HttpResponse::new(200, r#"{"username":"ann"}"#));
        let identity = gw.require_auth(Some(create_intent())).await.unwrap();
        assert_eq!(identity.username.as_deref(), Some("ann"));
        assert!(!store.is_pending());
        assert!(nav.visited.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn replay_does_not_resave_intent() {
        let (gw, store, nav) = gateway(HttpResponse::new(403, ""));
        {
            let _guard = gw.begin_replay().unwrap();
            assert!(gw.begin_replay().is_none());
            let err = gw
                .auth_fetch(HttpRequest::post("/p"), Some(create_intent()))
                .await
                .unwrap_err();
            assert!(err.is_auth_redirect());
        }
        assert!(!gw.is_replaying());
        assert!(!store.is_pending());
        assert_eq!(nav.visited.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn server_error_is_not_auth() {
        let (gw, _store, nav) = gateway(HttpResponse::new(500, ""));
        let err = gw.require_auth(None).await.unwrap_err();
        assert!(matches!(err, ReversiError::Http { status: 500, .. }));
        assert!(nav.visited.lock().unwrap().is_empty());
    }
}
