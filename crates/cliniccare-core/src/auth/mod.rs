//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `SessionStore`: access token, current user, login/logout/silent refresh
//! - `TokenProvider`: the capability the API client uses to read and renew
//!   the access token
//! - `MarkerStore`: the persisted "previously logged in" flag that gates
//!   silent refresh on start-up
//! - `RefreshCookieStore`: OS keychain storage for the refresh cookie
//!
//! Access tokens live in memory only. A session survives a restart through
//! the marker plus the refresh cookie.

pub mod credentials;
pub mod marker;
pub mod provider;
pub mod session;

pub use credentials::{KeychainCookieStore, MemoryCookieStore, RefreshCookieStore};
pub use marker::{FileMarker, MarkerStore, MemoryMarker};
pub use provider::TokenProvider;
pub use session::{Session, SessionEvent, SessionStore};
