//! REST API client module for the marketplace backend.
//!
//! This module provides the `ApiClient` for account management and post
//! browsing. Authenticated calls carry a JWT bearer token, which callers
//! obtain from `SessionManager::get_valid_token` before every request.

pub mod client;
pub mod error;

pub use client::{ApiClient, DEFAULT_PAGE_LIMIT};
pub use error::ApiError;
