//! ClinicCare core - session management and API access for the ClinicCare
//! medical records back end.
//!
//! The crate is organised around three pieces:
//!
//! - [`auth::SessionStore`]: access token, current user, persisted session
//!   marker, and the login / logout / silent refresh flow
//! - [`api::ApiClient`]: the authenticated request pipeline. It attaches the
//!   bearer token and transparently refreshes expired tokens, queueing
//!   concurrent failures behind a single refresh call
//! - [`router::RouterGuard`]: allows or redirects navigation based on the
//!   session state

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod router;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiError, HttpTransport, RetryPolicy, Transport};
pub use auth::{SessionEvent, SessionStore, TokenProvider};
pub use config::Config;
pub use router::{Navigation, Route, RouterGuard};
