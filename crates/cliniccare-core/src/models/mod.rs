//! Data models for ClinicCare entities.
//!
//! This module contains the records exchanged with the back end:
//!
//! - `User`, `Role`, `UserCreate`: staff accounts
//! - `Consultation`, `ConsultationCreate`: patient visits and their diagnoses
//! - `Diagnosis`: ICD-10 codes
//! - `LoginRequest`, `TokenResponse`: authentication payloads
//! - `ListQuery`, `Page`: pagination, sorting and search for list endpoints
//!
//! With the `ts` feature enabled the models derive TypeScript bindings for
//! the browser UI.

pub mod auth;
pub mod consultation;
pub mod diagnosis;
pub mod query;
pub mod user;

pub use auth::{HealthStatus, LoginRequest, TokenResponse};
pub use consultation::{Consultation, ConsultationCreate};
pub use diagnosis::Diagnosis;
pub use query::{ListQuery, Page, SortDirection};
pub use user::{Role, User, UserCreate};
