//! Authentication module for managing the client-side session.
//!
//! This module provides:
//! - `SessionManager`: credential lifecycle, expiry checks and silent refresh
//! - `CredentialStorage`: injected persistence (memory, file or OS keychain)
//! - `RouteGuard`: redirects driven by session state transitions
//!
//! Access tokens are treated as expired 5 minutes before their `exp` claim.

pub mod guard;
pub mod session;
pub mod storage;
pub mod token;

pub use guard::{RouteGuard, Router};
pub use session::{Session, SessionManager, SessionState, TokenRefresher, User};
pub use storage::{CredentialStorage, FileStorage, KeyringStorage, MemoryStorage};
