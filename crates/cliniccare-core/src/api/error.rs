use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Request rejected: {0}")]
    Validation(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(Arc<reqwest::Error>),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to encode request body: {0}")]
    Serialization(String),

    /// The access token was rejected and obtaining a new one failed.
    /// Every request queued behind the same refresh carries this error.
    #[error("Session refresh failed: {0}")]
    Refresh(Box<ApiError>),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::NetworkError(Arc::new(err))
    }
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            400 | 422 => ApiError::Validation(truncated),
            401 => ApiError::Unauthorized(truncated),
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    pub(crate) fn refresh_abandoned() -> Self {
        ApiError::Refresh(Box::new(ApiError::InvalidResponse(
            "refresh was abandoned before it settled".to_string(),
        )))
    }

    /// True for 401-class failures, including a failed refresh caused by one.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            ApiError::Unauthorized(_) => true,
            ApiError::Refresh(inner) => inner.is_unauthorized(),
            _ => false,
        }
    }

    /// The `detail` message of a FastAPI error body, if there is one.
    ///
    /// Validation errors (422) carry a list of `{loc, msg}` objects; their
    /// messages are joined.
    pub fn detail(&self) -> Option<String> {
        let body = match self {
            ApiError::AccessDenied(b)
            | ApiError::Unauthorized(b)
            | ApiError::NotFound(b)
            | ApiError::Validation(b)
            | ApiError::ServerError(b) => b,
            ApiError::Refresh(inner) => return inner.detail(),
            _ => return None,
        };

        let value: Value = serde_json::from_str(body).ok()?;
        match value.get("detail")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Array(items) => {
                let messages: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(Value::as_str))
                    .collect();
                (!messages.is_empty()).then(|| messages.join("; "))
            }
            _ => None,
        }
    }

    /// Message suitable for showing to a user, falling back to `default`
    /// when the server did not explain itself.
    pub fn user_message(&self, default: &str) -> String {
        self.detail().unwrap_or_else(|| default.to_string())
    }
}
