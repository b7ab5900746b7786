//! API client for the ClinicCare REST API.
//!
//! Every data request goes through [`ApiClient::execute`], which attaches the
//! bearer token and hides token expiry from callers: a 401 triggers one
//! refresh and a single retry with the new token. The token provider owns
//! the refresh slot, so every client (and the provider itself) failing at the
//! same time shares that one refresh.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::TokenProvider;
use crate::models::{
    Consultation, ConsultationCreate, Diagnosis, HealthStatus, ListQuery, Page, User, UserCreate,
};

use super::transport::{paths, ApiRequest, ApiResponse, Transport};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// How rate-limited requests are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RATE_LIMIT_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }
}

/// Authenticated API client.
///
/// Clones share the transport and the token provider, so concurrent
/// requests from any clone coalesce onto the provider's one refresh.
pub struct ApiClient<T, P> {
    transport: Arc<T>,
    tokens: Arc<P>,
    retry: RetryPolicy,
}

impl<T, P> Clone for ApiClient<T, P> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            tokens: Arc::clone(&self.tokens),
            retry: self.retry,
        }
    }
}

impl<T: Transport, P: TokenProvider> ApiClient<T, P> {
    pub fn new(transport: Arc<T>, tokens: Arc<P>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            tokens,
            retry,
        }
    }

    /// Whether a refresh is currently outstanding
    pub fn is_refreshing(&self) -> bool {
        self.tokens.is_refreshing()
    }

    /// Send a request, refreshing the access token once if it was rejected.
    pub async fn execute(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        if !request.is_auth_call() {
            request.bearer = self.tokens.access_token();
        }

        let response = self.send_with_backoff(&request).await?;
        if response.status != StatusCode::UNAUTHORIZED || !self.should_refresh(&request) {
            return response.into_result();
        }

        debug!(path = %request.path, "Access token rejected");
        let token = self.refreshed_token().await?;

        let retry = request.into_retry(token);
        debug!(path = %retry.path, "Retrying with refreshed token");
        self.send_with_backoff(&retry).await?.into_result()
    }

    fn should_refresh(&self, request: &ApiRequest) -> bool {
        !request.is_retry() && !request.is_auth_call() && self.tokens.has_prior_session()
    }

    async fn refreshed_token(&self) -> Result<String, ApiError> {
        self.tokens
            .refresh_token()
            .await
            .map_err(|e| ApiError::Refresh(Box::new(e)))
    }

    async fn send_with_backoff(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut retries = 0;
        let mut backoff = self.retry.initial_backoff;

        loop {
            let response = self.transport.send(request).await?;
            if response.status != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            retries += 1;
            if retries > self.retry.max_retries {
                return Err(ApiError::RateLimited);
            }
            warn!(
                path = %request.path,
                retry = retries,
                backoff_ms = backoff.as_millis() as u64,
                "Rate limited, backing off"
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2; // Exponential backoff
        }
    }

    async fn get<R: DeserializeOwned>(&self, path: &str, query: Vec<(String, String)>) -> Result<R, ApiError> {
        let request = ApiRequest::get(path).with_query(query);
        self.execute(request).await?.json()
    }

    async fn post<R: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<R, ApiError> {
        let request = ApiRequest::post(path, body)?;
        self.execute(request).await?.json()
    }

    // ===== Data Methods =====

    /// List staff accounts (admin only)
    pub async fn list_users(&self, query: &ListQuery) -> Result<Page<User>, ApiError> {
        self.get(paths::USERS, query.to_pairs()).await
    }

    /// Create a staff account (admin only)
    pub async fn create_user(&self, user: &UserCreate) -> Result<User, ApiError> {
        self.post(paths::USERS, user).await
    }

    /// List consultations. Doctors see their own, admins see all.
    pub async fn list_consultations(&self, query: &ListQuery) -> Result<Page<Consultation>, ApiError> {
        self.get(paths::CONSULTATIONS, query.to_pairs()).await
    }

    pub async fn get_consultation(&self, id: Uuid) -> Result<Consultation, ApiError> {
        let path = format!("{}{}", paths::CONSULTATIONS, id);
        self.get(&path, Vec::new()).await
    }

    pub async fn create_consultation(&self, consultation: &ConsultationCreate) -> Result<Consultation, ApiError> {
        self.post(paths::CONSULTATIONS, consultation).await
    }

    /// Search ICD-10 diagnosis codes
    pub async fn search_diagnoses(&self, query: &ListQuery) -> Result<Page<Diagnosis>, ApiError> {
        self.get(paths::DIAGNOSES, query.to_pairs()).await
    }

    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.get(paths::HEALTH, Vec::new()).await
    }
}
