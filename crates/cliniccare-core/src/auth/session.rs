use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::StatusCode;
use tokio::sync::{broadcast, OnceCell};
use tracing::{debug, error, info, warn};

use crate::api::transport::REFRESH_COOKIE;
use crate::api::{paths, ApiError, ApiRequest, ApiResponse, RefreshCoordinator, Ticket, Transport};
use crate::models::{LoginRequest, TokenResponse, User};

use super::{MarkerStore, RefreshCookieStore, TokenProvider};

/// Capacity of the session event channel.
/// Events are rare (login, refresh, logout); slow subscribers only lose old ones.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// In-memory authentication state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    /// Empty when unauthenticated
    pub access_token: String,
    pub current_user: Option<User>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        !self.access_token.is_empty()
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Utc::now() > at).unwrap_or(false)
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> Option<i64> {
        self.expires_at
            .map(|at| (at - Utc::now()).num_minutes().max(0))
    }
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A login completed and the current user is known
    Authenticated,
    /// A new access token replaced the old one
    Refreshed,
    /// The session was torn down; the UI should show the login page
    LoginRequired,
}

/// Single source of truth for authentication state.
///
/// The store owns the process-wide refresh slot: its own refreshes, the
/// interceptor's refreshes (through [`TokenProvider`]) and the 401 retries of
/// `/users/me` and `/auth/logout` all share one in-flight refresh. Only the
/// login and refresh calls bypass the 401 handling.
pub struct SessionStore<T> {
    transport: Arc<T>,
    state: RwLock<Session>,
    refresh: RefreshCoordinator,
    marker: Arc<dyn MarkerStore>,
    cookies: Arc<dyn RefreshCookieStore>,
    events: broadcast::Sender<SessionEvent>,
    initialized: OnceCell<()>,
}

impl<T: Transport> SessionStore<T> {
    pub fn new(
        transport: Arc<T>,
        marker: Arc<dyn MarkerStore>,
        cookies: Arc<dyn RefreshCookieStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            state: RwLock::new(Session::default()),
            refresh: RefreshCoordinator::new(),
            marker,
            cookies,
            events,
            initialized: OnceCell::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Copy of the current session state
    pub fn snapshot(&self) -> Session {
        self.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_authenticated()
    }

    /// Get the bearer token if authenticated
    pub fn token(&self) -> Option<String> {
        let state = self.read();
        (!state.access_token.is_empty()).then(|| state.access_token.clone())
    }

    pub fn current_user(&self) -> Option<User> {
        self.read().current_user.clone()
    }

    /// Whether a refresh is currently outstanding
    pub fn is_refreshing(&self) -> bool {
        self.refresh.is_refreshing()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Log in with email and password.
    ///
    /// Returns true when the session ends up authenticated. Failures are
    /// logged, never returned, and leave no earlier session behind.
    pub async fn login(&self, credentials: &LoginRequest) -> bool {
        let request = match ApiRequest::post(paths::LOGIN, credentials) {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "Failed to build login request");
                return self.reject_login();
            }
        };

        let response = match self.call(request).await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, email = %credentials.email, "Login failed");
                return self.reject_login();
            }
        };

        let token: TokenResponse = match response.json() {
            Ok(t) => t,
            Err(e) => {
                error!(error = %e, "Login response could not be parsed");
                return self.reject_login();
            }
        };
        if token.access_token.is_empty() {
            error!("Login response carried an empty access token");
            return self.reject_login();
        }

        self.capture_refresh_cookie(&response);
        self.set_access_token(&token);

        if self.fetch_current_user().await.is_err() {
            return false;
        }

        info!(email = %credentials.email, "Login successful");
        let _ = self.events.send(SessionEvent::Authenticated);
        true
    }

    /// Silent refresh. Returns false (after clearing the session) when the
    /// server refuses to issue a new token. Joins a refresh already in flight
    /// instead of starting a second one.
    pub async fn refresh(&self) -> bool {
        self.coordinated_refresh().await.is_ok()
    }

    /// Load the identity behind the current token.
    ///
    /// Any failure, transient or not, tears the session down: a session whose
    /// user cannot be resolved is treated as invalid.
    pub async fn fetch_current_user(&self) -> Result<User, ApiError> {
        let request = ApiRequest::get(paths::CURRENT_USER).with_bearer(self.token());

        match self.authorized_call(request).await.and_then(|r| r.json::<User>()) {
            Ok(user) => {
                debug!(user_id = %user.id, "Current user loaded");
                self.write().current_user = Some(user.clone());
                Ok(user)
            }
            Err(e) => {
                error!(error = %e, "Failed to fetch current user");
                self.logout().await;
                Err(e)
            }
        }
    }

    /// Restore a previous session at start-up.
    ///
    /// Runs once per store; later calls return immediately. Without the
    /// persisted marker no request is made.
    pub async fn init(&self) {
        self.initialized
            .get_or_init(|| async move {
                if !self.marker.is_set() {
                    debug!("No previous session marker, skipping silent refresh");
                    return;
                }

                info!("Previous session found, attempting silent refresh");
                if self.refresh().await {
                    let _ = self.fetch_current_user().await;
                }
            })
            .await;
    }

    /// Best-effort server logout followed by an unconditional local teardown.
    pub async fn logout(&self) {
        let request = self.logout_request();

        if let Err(e) = self.authorized_call(request).await {
            warn!(error = %e, "Logout request failed, clearing local session anyway");
        }

        self.end_session();
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Send a store request that needs a valid access token. A 401 is
    /// answered like the interceptor does: one shared refresh, one retry.
    async fn authorized_call(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let response = self.transport.send(&request).await?;
        if response.status != StatusCode::UNAUTHORIZED
            || request.is_retry()
            || request.is_auth_call()
            || !self.marker.is_set()
        {
            return response.into_result();
        }

        debug!(path = %request.path, "Access token rejected");
        let token = self
            .coordinated_refresh()
            .await
            .map_err(|e| ApiError::Refresh(Box::new(e)))?;

        let retry = request.into_retry(token);
        debug!(path = %retry.path, "Retrying with refreshed token");
        self.transport.send(&retry).await?.into_result()
    }

    /// Lead a refresh or wait for the one in flight.
    async fn coordinated_refresh(&self) -> Result<String, ApiError> {
        match self.refresh.acquire() {
            Ticket::Waiter(rx) => rx.await.unwrap_or_else(|_| Err(ApiError::refresh_abandoned())),
            Ticket::Leader(guard) => {
                info!("Refreshing access token");
                let outcome = self.try_refresh().await;
                let released = guard.settle(outcome.clone());
                debug!(released, success = outcome.is_ok(), "Refresh settled");
                outcome
            }
        }
    }

    /// Only called by the refresh leader.
    async fn try_refresh(&self) -> Result<String, ApiError> {
        let request = ApiRequest::post_empty(paths::REFRESH).with_cookie(self.refresh_cookie_header());

        let outcome = self.call(request).await.and_then(|response| {
            let token: TokenResponse = response.json()?;
            if token.access_token.is_empty() {
                return Err(ApiError::InvalidResponse(
                    "refresh returned an empty access token".to_string(),
                ));
            }
            Ok((response, token))
        });

        match outcome {
            Ok((response, token)) => {
                self.capture_refresh_cookie(&response);
                self.set_access_token(&token);
                debug!("Access token refreshed");
                let _ = self.events.send(SessionEvent::Refreshed);
                Ok(token.access_token)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, logging out");
                // The refresh slot is still held here, so the logout call
                // must not wait on a refresh of its own.
                if let Err(e) = self.call(self.logout_request()).await {
                    warn!(error = %e, "Logout request failed, clearing local session anyway");
                }
                self.end_session();
                Err(e)
            }
        }
    }

    fn logout_request(&self) -> ApiRequest {
        ApiRequest::post_empty(paths::LOGOUT)
            .with_bearer(self.token())
            .with_cookie(self.refresh_cookie_header())
    }

    fn reject_login(&self) -> bool {
        self.end_session();
        false
    }

    /// Clear local state and tell subscribers, once per session.
    fn end_session(&self) {
        let had_session = self.is_authenticated() || self.marker.is_set();
        self.clear_local();

        if had_session {
            info!("Session cleared");
            let _ = self.events.send(SessionEvent::LoginRequired);
        }
    }

    async fn call(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.transport.send(&request).await?.into_result()
    }

    fn set_access_token(&self, token: &TokenResponse) {
        {
            let mut state = self.write();
            state.access_token = token.access_token.clone();
            state.expires_at = token
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs));
        }

        if !token.access_token.is_empty() {
            if let Err(e) = self.marker.set() {
                warn!(error = %e, "Failed to persist session marker");
            }
        }
    }

    fn capture_refresh_cookie(&self, response: &ApiResponse) {
        if let Some(value) = response.cookie(REFRESH_COOKIE).filter(|v| !v.is_empty()) {
            if let Err(e) = self.cookies.store(&value) {
                warn!(error = %e, "Failed to store refresh cookie");
            }
        }
    }

    fn refresh_cookie_header(&self) -> Option<String> {
        match self.cookies.load() {
            Ok(value) => value.map(|v| format!("{}={}", REFRESH_COOKIE, v)),
            Err(e) => {
                warn!(error = %e, "Failed to load refresh cookie");
                None
            }
        }
    }

    fn clear_local(&self) {
        *self.write() = Session::default();

        if let Err(e) = self.marker.clear() {
            warn!(error = %e, "Failed to clear session marker");
        }
        if let Err(e) = self.cookies.delete() {
            warn!(error = %e, "Failed to delete refresh cookie");
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<T: Transport> TokenProvider for SessionStore<T> {
    fn access_token(&self) -> Option<String> {
        self.token()
    }

    fn has_prior_session(&self) -> bool {
        self.marker.is_set()
    }

    fn is_refreshing(&self) -> bool {
        self.refresh.is_refreshing()
    }

    async fn refresh_token(&self) -> Result<String, ApiError> {
        self.coordinated_refresh().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryCookieStore, MemoryMarker};
    use crate::testing::{credentials, FakeBackend, PASSWORD, REFRESH_VALUE};

    struct Harness {
        backend: Arc<FakeBackend>,
        marker: Arc<MemoryMarker>,
        cookies: Arc<MemoryCookieStore>,
        store: SessionStore<FakeBackend>,
    }

    fn harness(marker_set: bool, cookie: Option<&str>) -> Harness {
        let backend = Arc::new(FakeBackend::new());
        let marker = Arc::new(MemoryMarker::new(marker_set));
        let cookies = Arc::new(match cookie {
            Some(v) => MemoryCookieStore::with_value(v),
            None => MemoryCookieStore::default(),
        });
        let store = SessionStore::new(backend.clone(), marker.clone(), cookies.clone());
        Harness {
            backend,
            marker,
            cookies,
            store,
        }
    }

    #[tokio::test]
    async fn test_init_without_marker_makes_no_requests() {
        let h = harness(false, None);

        h.store.init().await;

        assert!(!h.store.is_authenticated());
        assert!(h.backend.requests().is_empty());
        assert_eq!(h.backend.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_login_success_populates_session() {
        let h = harness(false, None);
        let mut events = h.store.subscribe();

        assert!(h.store.login(&credentials()).await);

        assert!(h.store.is_authenticated());
        assert_eq!(h.store.token().as_deref(), Some("T1"));
        let user = h.store.current_user().expect("user should be loaded");
        assert_eq!(user.email, "doc@clinic.test");
        assert!(h.marker.is_set());
        assert_eq!(h.cookies.load().unwrap().as_deref(), Some(REFRESH_VALUE));
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Authenticated);

        // The me call carried the fresh token
        let me = h.backend.requests_to(paths::CURRENT_USER);
        assert_eq!(me[0].bearer.as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn test_login_sets_expiry() {
        let h = harness(false, None);
        assert!(h.store.login(&credentials()).await);

        let session = h.store.snapshot();
        assert!(!session.is_expired());
        let minutes = session.minutes_until_expiry().expect("expiry should be known");
        assert!((29..=30).contains(&minutes));
    }

    #[tokio::test]
    async fn test_login_with_bad_password_returns_false() {
        let h = harness(false, None);

        assert!(!h.store.login(&LoginRequest::new("doc@clinic.test", "wrong")).await);

        assert!(!h.store.is_authenticated());
        assert!(!h.marker.is_set());
        assert_eq!(h.store.snapshot(), Session::default());
    }

    #[tokio::test]
    async fn test_login_network_failure_returns_false() {
        let h = harness(false, None);
        h.backend.set_offline(true);

        assert!(!h.store.login(&credentials()).await);
        assert!(!h.store.is_authenticated());
    }

    #[tokio::test]
    async fn test_login_then_logout_restores_anonymous_state() {
        let h = harness(false, None);
        let initial = h.store.snapshot();
        let mut events = h.store.subscribe();

        assert!(h.store.login(&credentials()).await);
        h.store.logout().await;

        assert_eq!(h.store.snapshot(), initial);
        assert!(!h.marker.is_set());
        assert_eq!(h.cookies.load().unwrap(), None);
        assert_eq!(h.backend.logout_calls(), 1);

        assert_eq!(events.try_recv().unwrap(), SessionEvent::Authenticated);
        assert_eq!(events.try_recv().unwrap(), SessionEvent::LoginRequired);
    }

    #[tokio::test]
    async fn test_logout_sends_token_and_cookie() {
        let h = harness(false, None);
        assert!(h.store.login(&credentials()).await);
        h.store.logout().await;

        let logout = h.backend.requests_to(paths::LOGOUT);
        assert_eq!(logout.len(), 1);
        assert_eq!(logout[0].bearer.as_deref(), Some("T1"));
        assert_eq!(
            logout[0].cookie.as_deref(),
            Some(format!("refresh_token={}", REFRESH_VALUE).as_str())
        );
    }

    #[tokio::test]
    async fn test_logout_endpoint_failure_is_swallowed() {
        let h = harness(false, None);
        assert!(h.store.login(&credentials()).await);
        h.backend.set_logout_fails(true);

        h.store.logout().await;

        assert!(!h.store.is_authenticated());
        assert!(!h.marker.is_set());
    }

    #[tokio::test]
    async fn test_init_with_marker_restores_session() {
        let h = harness(true, Some(REFRESH_VALUE));
        let mut events = h.store.subscribe();

        h.store.init().await;

        assert!(h.store.is_authenticated());
        assert_eq!(h.store.token().as_deref(), Some("T2"));
        assert!(h.store.current_user().is_some());
        assert_eq!(h.backend.refresh_calls(), 1);
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Refreshed);

        let refresh = h.backend.requests_to(paths::REFRESH);
        assert_eq!(refresh[0].bearer, None);
        assert_eq!(
            refresh[0].cookie.as_deref(),
            Some(format!("refresh_token={}", REFRESH_VALUE).as_str())
        );
    }

    #[tokio::test]
    async fn test_init_runs_once() {
        let h = harness(true, Some(REFRESH_VALUE));

        h.store.init().await;
        h.store.init().await;

        assert_eq!(h.backend.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_init_with_rejected_refresh_clears_marker() {
        let h = harness(true, Some("stale-cookie"));
        let mut events = h.store.subscribe();

        h.store.init().await;

        assert!(!h.store.is_authenticated());
        assert!(!h.marker.is_set());
        assert_eq!(h.cookies.load().unwrap(), None);
        assert_eq!(h.backend.refresh_calls(), 1);
        assert!(h.backend.requests_to(paths::CURRENT_USER).is_empty());
        assert_eq!(events.try_recv().unwrap(), SessionEvent::LoginRequired);
    }

    #[tokio::test]
    async fn test_refresh_failure_returns_false_and_logs_out() {
        let h = harness(false, None);
        assert!(h.store.login(&credentials()).await);
        h.backend.set_refresh_ok(false);

        assert!(!h.store.refresh().await);

        assert!(!h.store.is_authenticated());
        assert!(!h.marker.is_set());
    }

    #[tokio::test]
    async fn test_refresh_success_replaces_token() {
        let h = harness(false, None);
        assert!(h.store.login(&credentials()).await);

        assert!(h.store.refresh().await);

        assert_eq!(h.store.token().as_deref(), Some("T2"));
        // The user survives a token swap
        assert!(h.store.current_user().is_some());
    }

    #[tokio::test]
    async fn test_fetch_user_failure_logs_out() {
        let h = harness(false, None);
        assert!(h.store.login(&credentials()).await);
        h.backend.set_me_fails(true);

        let result = h.store.fetch_current_user().await;

        assert!(matches!(result, Err(ApiError::ServerError(_))));
        assert!(!h.store.is_authenticated());
        assert!(!h.marker.is_set());
    }

    #[tokio::test]
    async fn test_login_fails_when_user_cannot_be_loaded() {
        let h = harness(false, None);
        h.backend.set_me_fails(true);

        assert!(!h.store.login(&LoginRequest::new("doc@clinic.test", PASSWORD)).await);
        assert!(!h.store.is_authenticated());
        assert!(!h.marker.is_set());
    }

    #[tokio::test]
    async fn test_fetch_user_with_expired_token_refreshes_and_retries() {
        let h = harness(false, None);
        assert!(h.store.login(&credentials()).await);
        h.backend.expire_token();

        let user = h.store.fetch_current_user().await.expect("user should load after refresh");

        assert_eq!(user.email, "doc@clinic.test");
        assert_eq!(h.backend.refresh_calls(), 1);
        assert_eq!(h.store.token().as_deref(), Some("T2"));
        assert!(h.store.is_authenticated());

        let me = h.backend.requests_to(paths::CURRENT_USER);
        assert_eq!(me.len(), 3);
        assert_eq!(me[1].bearer.as_deref(), Some("T1"));
        assert!(!me[1].is_retry());
        assert_eq!(me[2].bearer.as_deref(), Some("T2"));
        assert!(me[2].is_retry());
    }

    #[tokio::test]
    async fn test_fetch_user_with_expired_token_and_rejected_refresh_logs_out() {
        let h = harness(false, None);
        assert!(h.store.login(&credentials()).await);
        let mut events = h.store.subscribe();
        h.backend.expire_token();
        h.backend.set_refresh_ok(false);

        let result = h.store.fetch_current_user().await;

        match result {
            Err(ApiError::Refresh(inner)) => assert!(inner.is_unauthorized()),
            other => panic!("expected refresh error, got {:?}", other),
        }
        assert_eq!(h.backend.refresh_calls(), 1);
        assert!(!h.store.is_authenticated());
        assert!(!h.marker.is_set());
        assert_eq!(events.try_recv().unwrap(), SessionEvent::LoginRequired);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_logout_with_expired_token_refreshes_first() {
        let h = harness(false, None);
        assert!(h.store.login(&credentials()).await);
        h.backend.set_logout_checks_token(true);
        h.backend.expire_token();

        h.store.logout().await;

        let logout = h.backend.requests_to(paths::LOGOUT);
        assert_eq!(logout.len(), 2);
        assert_eq!(logout[0].bearer.as_deref(), Some("T1"));
        assert_eq!(logout[1].bearer.as_deref(), Some("T2"));
        assert!(logout[1].is_retry());
        assert_eq!(h.backend.refresh_calls(), 1);
        assert!(!h.store.is_authenticated());
        assert!(!h.marker.is_set());
    }

    #[tokio::test]
    async fn test_concurrent_store_refreshes_share_one_call() {
        let h = harness(false, None);
        assert!(h.store.login(&credentials()).await);
        h.backend.set_refresh_yields(3);

        let (first, second) = tokio::join!(h.store.refresh(), h.store.refresh_token());

        assert!(first);
        assert_eq!(second.as_deref().ok(), Some("T2"));
        assert_eq!(h.backend.refresh_calls(), 1);
        assert!(!h.store.is_refreshing());
    }

    #[tokio::test]
    async fn test_failed_login_drops_previous_session() {
        let h = harness(false, None);
        assert!(h.store.login(&credentials()).await);
        let mut events = h.store.subscribe();

        assert!(!h.store.login(&LoginRequest::new("doc@clinic.test", "wrong")).await);

        assert!(!h.store.is_authenticated());
        assert_eq!(h.store.token(), None);
        assert!(!h.marker.is_set());
        assert_eq!(h.cookies.load().unwrap(), None);
        assert_eq!(events.try_recv().unwrap(), SessionEvent::LoginRequired);
    }

    #[tokio::test]
    async fn test_token_provider_reports_prior_session() {
        let h = harness(false, None);
        assert!(!h.store.has_prior_session());

        assert!(h.store.login(&credentials()).await);
        assert!(h.store.has_prior_session());
        assert_eq!(h.store.access_token().as_deref(), Some("T1"));
    }
}
