use async_trait::async_trait;

use crate::api::ApiError;

/// Source of access tokens for the API client.
///
/// The client never reaches into session state directly; it asks the
/// provider for the current token and, when the server rejects it, for a
/// fresh one.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// The current access token, `None` when unauthenticated
    fn access_token(&self) -> Option<String>;

    /// Whether a session was established before, making a refresh worth trying
    fn has_prior_session(&self) -> bool;

    /// Whether a refresh is currently outstanding
    fn is_refreshing(&self) -> bool {
        false
    }

    /// Obtain a new access token. Concurrent callers must share a single
    /// refresh. On failure the provider is expected to have cleared its
    /// session before returning the error.
    async fn refresh_token(&self) -> Result<String, ApiError>;
}
