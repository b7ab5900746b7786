//! Navigation guard for the admin UI.
//!
//! Pages other than `/login` require an authenticated session. The first
//! navigation of the process gives the session store a chance to restore a
//! previous session before the decision is made.

use std::fmt;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::api::Transport;
use crate::auth::SessionStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Login,
    Home,
    Users,
    Consultations,
    Consultation(Uuid),
    Diagnoses,
}

impl Route {
    /// Parse a path such as `/consultations/<uuid>`. Trailing slashes are ignored.
    pub fn parse(path: &str) -> Option<Route> {
        let trimmed = path.trim_end_matches('/');
        let mut segments = trimmed.split('/').skip(1);

        let route = match (segments.next(), segments.next()) {
            (None, _) | (Some(""), None) => Route::Home,
            (Some("login"), None) => Route::Login,
            (Some("users"), None) => Route::Users,
            (Some("consultations"), None) => Route::Consultations,
            (Some("consultations"), Some(id)) => Route::Consultation(Uuid::parse_str(id).ok()?),
            (Some("diagnoses"), None) => Route::Diagnoses,
            _ => return None,
        };

        if segments.next().is_some() {
            return None;
        }
        Some(route)
    }

    pub fn path(&self) -> String {
        match self {
            Route::Login => "/login".to_string(),
            Route::Home => "/".to_string(),
            Route::Users => "/users".to_string(),
            Route::Consultations => "/consultations".to_string(),
            Route::Consultation(id) => format!("/consultations/{}", id),
            Route::Diagnoses => "/diagnoses".to_string(),
        }
    }

    /// Pages reachable without a session
    pub fn is_public(&self) -> bool {
        matches!(self, Route::Login)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Allow,
    Redirect(Route),
}

pub struct RouterGuard<T> {
    session: Arc<SessionStore<T>>,
}

impl<T: Transport> RouterGuard<T> {
    pub fn new(session: Arc<SessionStore<T>>) -> Self {
        Self { session }
    }

    /// Decide whether navigation to `to` may proceed.
    pub async fn before_each(&self, to: &Route) -> Navigation {
        // No-op after the first call
        self.session.init().await;

        let authenticated = self.session.is_authenticated();
        debug!(to = %to, authenticated, "Route guard");

        if !to.is_public() && !authenticated {
            debug!("Auth required but not authenticated, redirecting to /login");
            Navigation::Redirect(Route::Login)
        } else if *to == Route::Login && authenticated {
            debug!("Already authenticated, redirecting from /login to /");
            Navigation::Redirect(Route::Home)
        } else {
            Navigation::Allow
        }
    }
}
