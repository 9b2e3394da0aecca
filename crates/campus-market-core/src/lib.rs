//! Core library for the campus marketplace client.
//!
//! Provides the session manager (credential storage, expiry detection,
//! silent refresh, route guarding), the REST API client and the post models
//! shared by every front end.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{RouteGuard, Router, Session, SessionManager, SessionState};
pub use config::{Config, StorageBackend};
