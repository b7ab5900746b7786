//! REST API module for the ClinicCare back end.
//!
//! This module provides:
//! - `Transport`: the HTTP seam (`HttpTransport` over reqwest in production)
//! - `ApiClient`: authenticated requests with transparent token refresh
//! - `RefreshCoordinator`: the single in-flight refresh slot and its waiters
//!
//! The API uses JWT bearer tokens obtained from `/auth/login`. A longer-lived
//! refresh token travels out of band as the `refresh_token` cookie.

pub mod client;
pub mod error;
pub mod refresh;
pub mod transport;

pub use client::{ApiClient, RetryPolicy};
pub use error::ApiError;
pub use refresh::{RefreshCoordinator, Ticket};
pub use transport::{paths, ApiRequest, ApiResponse, HttpTransport, Transport};
