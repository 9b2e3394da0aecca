use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::storage::{lock, CredentialStorage, CREDENTIAL_KEYS, REFRESH_TOKEN_KEY, TOKEN_KEY, USER_ID_KEY};
use super::token;
use crate::api::ApiError;
use crate::models::RefreshResponse;

/// Exchanges a refresh token for a new access token.
///
/// Implementations must report a server verdict (non-2xx) as an error for
/// which [`ApiError::is_rejection`] is true, and anything else (no response,
/// unreadable body) as a non-rejection.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError>;
}

/// Authentication state machine. There is no terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Authenticated { user_id: String },
    Unauthenticated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
}

/// Snapshot consumed by route guards and pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub user: Option<User>,
}

impl From<&SessionState> for Session {
    fn from(state: &SessionState) -> Self {
        match state {
            SessionState::Initializing => Session {
                is_authenticated: false,
                is_loading: true,
                user: None,
            },
            SessionState::Authenticated { user_id } => Session {
                is_authenticated: true,
                is_loading: false,
                user: Some(User { id: user_id.clone() }),
            },
            SessionState::Unauthenticated => Session {
                is_authenticated: false,
                is_loading: false,
                user: None,
            },
        }
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Option<String>>>;

struct Inner {
    storage: Arc<dyn CredentialStorage>,
    refresher: Arc<dyn TokenRefresher>,
    state: watch::Sender<SessionState>,
    in_flight: Mutex<Option<RefreshFuture>>,
}

/// Owns the persisted credentials and the derived session state.
///
/// Clone is cheap; clones share storage, state and the in-flight refresh.
/// State transitions are published on a watch channel (see
/// [`SessionManager::subscribe`]); the manager itself never navigates.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(storage: Arc<dyn CredentialStorage>, refresher: Arc<dyn TokenRefresher>) -> Self {
        let (state, _) = watch::channel(SessionState::Initializing);
        Self {
            inner: Arc::new(Inner {
                storage,
                refresher,
                state,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Validate persisted credentials and settle the initial state.
    ///
    /// An expired token gets exactly one refresh attempt; if that yields no
    /// token the stored credentials are cleared.
    pub async fn initialize(&self) -> SessionState {
        self.inner.state.send_replace(SessionState::Initializing);

        let storage = &self.inner.storage;
        let state = match (storage.get(TOKEN_KEY), storage.get(USER_ID_KEY)) {
            (Some(access_token), Some(user_id)) => {
                if !token::is_token_expired(Some(&access_token)) {
                    debug!("Stored access token still valid");
                    SessionState::Authenticated { user_id }
                } else if self.refresh(false).await.is_some() {
                    SessionState::Authenticated { user_id }
                } else {
                    info!("Stored session expired and could not be refreshed");
                    self.clear_storage();
                    SessionState::Unauthenticated
                }
            }
            (None, None) if storage.get(REFRESH_TOKEN_KEY).is_none() => {
                SessionState::Unauthenticated
            }
            _ => {
                warn!("Discarding incomplete stored credentials");
                self.clear_storage();
                SessionState::Unauthenticated
            }
        };

        debug!(?state, "Session initialized");
        self.inner.state.send_replace(state.clone());
        state
    }

    /// Persist a freshly issued credential and mark the session authenticated.
    ///
    /// Without a refresh token any previously stored one is removed, so the
    /// three fields always belong to the same login. If any write fails,
    /// whatever was stored is cleared and the session becomes
    /// unauthenticated before the error is returned.
    pub fn login(&self, access_token: &str, user_id: &str, refresh_token: Option<&str>) -> Result<()> {
        if let Err(e) = self.store_credentials(access_token, user_id, refresh_token) {
            warn!(error = %e, "Failed to persist credentials, clearing session");
            self.clear_storage();
            self.inner.state.send_replace(SessionState::Unauthenticated);
            return Err(e);
        }

        info!(user_id = user_id, "Logged in");
        self.inner.state.send_replace(SessionState::Authenticated {
            user_id: user_id.to_string(),
        });
        Ok(())
    }

    fn store_credentials(
        &self,
        access_token: &str,
        user_id: &str,
        refresh_token: Option<&str>,
    ) -> Result<()> {
        let storage = &self.inner.storage;
        storage.set(TOKEN_KEY, access_token)?;
        storage.set(USER_ID_KEY, user_id)?;
        match refresh_token {
            Some(refresh) => storage.set(REFRESH_TOKEN_KEY, refresh),
            None => storage.remove(REFRESH_TOKEN_KEY),
        }
    }

    /// Clear all credentials and publish `Unauthenticated`.
    ///
    /// The transition is published even when already logged out so that
    /// navigation collaborators get a chance to redirect.
    pub fn logout(&self) {
        self.clear_storage();
        info!("Logged out");
        self.inner.state.send_replace(SessionState::Unauthenticated);
    }

    /// Whether `token` (or the stored access token) is expired, malformed or absent
    pub fn is_token_expired(&self, token: Option<&str>) -> bool {
        match token {
            Some(token) => token::is_token_expired(Some(token)),
            None => token::is_token_expired(self.inner.storage.get(TOKEN_KEY).as_deref()),
        }
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Concurrent callers share a single request. Returns `None` when no
    /// refresh token is stored, when the server rejects it (the session is
    /// then logged out), or when the server could not be reached (stored
    /// credentials are left as they were).
    pub async fn refresh_token(&self) -> Option<String> {
        self.refresh(true).await
    }

    /// Shared refresh. With `publish` unset a rejection clears storage
    /// without publishing, leaving the final transition to `initialize`.
    async fn refresh(&self, publish: bool) -> Option<String> {
        let pending = {
            let mut slot = lock(&self.inner.in_flight);
            match slot.as_ref() {
                Some(pending) => {
                    debug!("Joining in-flight token refresh");
                    pending.clone()
                }
                None => {
                    let this = self.clone();
                    let pending = async move {
                        let result = this.perform_refresh(publish).await;
                        lock(&this.inner.in_flight).take();
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    async fn perform_refresh(&self, publish: bool) -> Option<String> {
        let storage = &self.inner.storage;
        let Some(refresh_token) = storage.get(REFRESH_TOKEN_KEY) else {
            debug!("No refresh token stored, skipping refresh");
            return None;
        };
        if storage.get(USER_ID_KEY).is_none() {
            debug!("No user id stored, skipping refresh");
            return None;
        }

        match self.inner.refresher.refresh(&refresh_token).await {
            Ok(response) => {
                // A logout or new login while the request was in flight wins.
                if storage.get(REFRESH_TOKEN_KEY).as_deref() != Some(refresh_token.as_str()) {
                    debug!("Credentials changed during refresh, discarding result");
                    return None;
                }
                if let Err(e) = storage.set(TOKEN_KEY, &response.token) {
                    warn!(error = %e, "Failed to persist refreshed access token");
                }
                if let Some(ref rotated) = response.refresh_token {
                    if let Err(e) = storage.set(REFRESH_TOKEN_KEY, rotated) {
                        warn!(error = %e, "Failed to persist rotated refresh token");
                    }
                }
                info!(rotated = response.refresh_token.is_some(), "Access token refreshed");
                Some(response.token)
            }
            Err(e) if e.is_rejection() => {
                warn!(error = %e, "Refresh token rejected, ending session");
                if publish {
                    self.logout();
                } else {
                    self.clear_storage();
                }
                None
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, keeping stored credentials");
                None
            }
        }
    }

    /// The access token every authenticated request should use.
    ///
    /// Never returns a token known to be expired: an expired token is
    /// refreshed first, and `None` is returned if that fails.
    pub async fn get_valid_token(&self) -> Option<String> {
        let access_token = self.inner.storage.get(TOKEN_KEY)?;
        if !token::is_token_expired(Some(&access_token)) {
            return Some(access_token);
        }
        debug!("Access token expired, refreshing");
        self.refresh_token().await
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn session(&self) -> Session {
        Session::from(&*self.inner.state.borrow())
    }

    /// Receive every state transition, including repeated ones
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Expiry of the stored access token, for display
    pub fn token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner
            .storage
            .get(TOKEN_KEY)
            .and_then(|t| token::expires_at(&t))
    }

    fn clear_storage(&self) {
        for key in CREDENTIAL_KEYS {
            if let Err(e) = self.inner.storage.remove(key) {
                warn!(key = key, error = %e, "Failed to clear stored credential");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiClient;
    use crate::auth::storage::MemoryStorage;
    use crate::auth::token::token_expiring_in;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type Outcome = Box<dyn Fn() -> Result<RefreshResponse, ApiError> + Send + Sync>;

    struct FakeRefresher {
        calls: AtomicUsize,
        delay: Option<Duration>,
        outcome: Outcome,
    }

    impl FakeRefresher {
        fn new(outcome: impl Fn() -> Result<RefreshResponse, ApiError> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: None,
                outcome: Box::new(outcome),
            })
        }

        fn slow(
            delay: Duration,
            outcome: impl Fn() -> Result<RefreshResponse, ApiError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Some(delay),
                outcome: Box::new(outcome),
            })
        }

        fn issuing(token: &'static str) -> Arc<Self> {
            Self::new(move || {
                Ok(RefreshResponse {
                    token: token.to_string(),
                    refresh_token: None,
                })
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenRefresher for FakeRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<RefreshResponse, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.outcome)()
        }
    }

    fn manager_with(refresher: Arc<dyn TokenRefresher>) -> (SessionManager, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let manager = SessionManager::new(storage.clone(), refresher);
        (manager, storage)
    }

    fn seed(storage: &MemoryStorage, token: &str, user_id: &str, refresh: Option<&str>) {
        storage.set(TOKEN_KEY, token).unwrap();
        storage.set(USER_ID_KEY, user_id).unwrap();
        if let Some(refresh) = refresh {
            storage.set(REFRESH_TOKEN_KEY, refresh).unwrap();
        }
    }

    fn rejected() -> Result<RefreshResponse, ApiError> {
        Err(ApiError::Unauthorized("Invalid refresh token".to_string()))
    }

    /// Memory storage that fails writes to one chosen key
    #[derive(Default)]
    struct FailingStorage {
        values: MemoryStorage,
        fail_key: Mutex<Option<&'static str>>,
    }

    impl FailingStorage {
        fn fail_on(&self, key: &'static str) {
            *lock(&self.fail_key) = Some(key);
        }
    }

    impl CredentialStorage for FailingStorage {
        fn get(&self, key: &str) -> Option<String> {
            self.values.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            if *lock(&self.fail_key) == Some(key) {
                anyhow::bail!("disk full");
            }
            self.values.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<()> {
            self.values.remove(key)
        }
    }

    // -------------------------------------------------------------------------
    // login / logout
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_login_then_get_valid_token() {
        let refresher = FakeRefresher::issuing("unused");
        let (manager, storage) = manager_with(refresher.clone());
        let token = token_expiring_in(3600);

        manager.login(&token, "u1", Some("r1")).unwrap();

        assert_eq!(manager.get_valid_token().await.as_deref(), Some(token.as_str()));
        assert_eq!(refresher.calls(), 0);
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).as_deref(), Some("r1"));
        assert_eq!(
            manager.session(),
            Session {
                is_authenticated: true,
                is_loading: false,
                user: Some(User { id: "u1".to_string() }),
            }
        );
    }

    #[tokio::test]
    async fn test_login_without_refresh_token_drops_stale_one() {
        let (manager, storage) = manager_with(FakeRefresher::issuing("unused"));
        storage.set(REFRESH_TOKEN_KEY, "old").unwrap();

        manager.login("t", "u1", None).unwrap();

        assert!(storage.get(REFRESH_TOKEN_KEY).is_none());
        assert_eq!(storage.get(TOKEN_KEY).as_deref(), Some("t"));
    }

    #[tokio::test]
    async fn test_failed_login_write_does_not_mix_users() {
        let storage = Arc::new(FailingStorage::default());
        let manager = SessionManager::new(storage.clone(), FakeRefresher::issuing("unused"));
        let token_a = token_expiring_in(3600);
        let token_b = token_expiring_in(7200);
        manager.login(&token_a, "userA", Some("rA")).unwrap();

        storage.fail_on(USER_ID_KEY);
        assert!(manager.login(&token_b, "userB", Some("rB")).is_err());

        assert_eq!(manager.state(), SessionState::Unauthenticated);
        for key in CREDENTIAL_KEYS {
            assert!(storage.get(key).is_none(), "{key} left behind");
        }

        // Nothing to resume after a restart
        let restarted = SessionManager::new(storage.clone(), FakeRefresher::issuing("unused"));
        assert_eq!(restarted.initialize().await, SessionState::Unauthenticated);
        assert!(restarted.get_valid_token().await.is_none());
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let (manager, storage) = manager_with(FakeRefresher::issuing("unused"));
        manager.login("t", "u1", Some("r1")).unwrap();

        manager.logout();

        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(storage.is_empty());

        // Idempotent
        manager.logout();
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_logout_from_initializing() {
        let (manager, storage) = manager_with(FakeRefresher::issuing("unused"));
        seed(&storage, "t", "u1", Some("r1"));
        assert!(manager.session().is_loading);

        manager.logout();

        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_logout_republishes_state() {
        let (manager, _storage) = manager_with(FakeRefresher::issuing("unused"));
        manager.logout();
        let rx = manager.subscribe();

        manager.logout();

        assert!(rx.has_changed().unwrap());
    }

    // -------------------------------------------------------------------------
    // refresh_token
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_refresh_without_refresh_token_is_noop() {
        let refresher = FakeRefresher::issuing("T2");
        let (manager, storage) = manager_with(refresher.clone());
        seed(&storage, "t", "u1", None);

        assert!(manager.refresh_token().await.is_none());

        assert_eq!(refresher.calls(), 0);
        assert_eq!(storage.get(TOKEN_KEY).as_deref(), Some("t"));
        assert_eq!(storage.get(USER_ID_KEY).as_deref(), Some("u1"));
        assert_eq!(storage.len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_rejected_logs_out() {
        let refresher = FakeRefresher::new(rejected);
        let (manager, storage) = manager_with(refresher.clone());
        manager.login("t", "u1", Some("r1")).unwrap();

        assert!(manager.refresh_token().await.is_none());

        assert_eq!(refresher.calls(), 1);
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_unreadable_response_keeps_credentials() {
        let refresher =
            FakeRefresher::new(|| Err(ApiError::InvalidResponse("expected JSON".to_string())));
        let (manager, storage) = manager_with(refresher);
        manager.login("t", "u1", Some("r1")).unwrap();

        assert!(manager.refresh_token().await.is_none());

        assert_eq!(storage.get(TOKEN_KEY).as_deref(), Some("t"));
        assert_eq!(storage.get(USER_ID_KEY).as_deref(), Some("u1"));
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).as_deref(), Some("r1"));
        assert!(manager.session().is_authenticated);
    }

    #[tokio::test]
    async fn test_refresh_network_failure_keeps_credentials() {
        // Bind then release a port so nothing is listening on it
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let client = ApiClient::new(&format!("http://{}", addr)).unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let manager = SessionManager::new(storage.clone(), Arc::new(client));
        let expired = token_expiring_in(-10);
        manager.login(&expired, "u1", Some("r1")).unwrap();

        assert!(manager.refresh_token().await.is_none());

        assert_eq!(storage.get(TOKEN_KEY).as_deref(), Some(expired.as_str()));
        assert_eq!(storage.get(USER_ID_KEY).as_deref(), Some("u1"));
        assert!(manager.session().is_authenticated);
    }

    #[tokio::test]
    async fn test_refresh_stores_rotated_refresh_token() {
        let refresher = FakeRefresher::new(|| {
            Ok(RefreshResponse {
                token: "T2".to_string(),
                refresh_token: Some("R2".to_string()),
            })
        });
        let (manager, storage) = manager_with(refresher);
        manager.login("t", "u1", Some("r1")).unwrap();

        assert_eq!(manager.refresh_token().await.as_deref(), Some("T2"));
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).as_deref(), Some("R2"));
    }

    #[tokio::test]
    async fn test_logout_during_refresh_discards_result() {
        let refresher = FakeRefresher::slow(Duration::from_millis(50), || {
            Ok(RefreshResponse {
                token: "T2".to_string(),
                refresh_token: None,
            })
        });
        let (manager, storage) = manager_with(refresher);
        manager.login("t", "u1", Some("r1")).unwrap();

        let (result, _) = tokio::join!(manager.refresh_token(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            manager.logout();
        });

        assert!(result.is_none());
        assert!(storage.is_empty());
        assert_eq!(manager.state(), SessionState::Unauthenticated);
    }

    // -------------------------------------------------------------------------
    // get_valid_token
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_get_valid_token_refreshes_expired_token() {
        let refresher = FakeRefresher::issuing("T2");
        let (manager, storage) = manager_with(refresher.clone());
        manager
            .login(&token_expiring_in(-10), "u1", Some("r1"))
            .unwrap();

        assert_eq!(manager.get_valid_token().await.as_deref(), Some("T2"));

        assert_eq!(refresher.calls(), 1);
        assert_eq!(storage.get(TOKEN_KEY).as_deref(), Some("T2"));
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_get_valid_token_without_token_skips_network() {
        let refresher = FakeRefresher::issuing("T2");
        let (manager, storage) = manager_with(refresher.clone());
        storage.set(REFRESH_TOKEN_KEY, "r1").unwrap();

        assert!(manager.get_valid_token().await.is_none());
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_without_user_id_is_noop() {
        let refresher = FakeRefresher::issuing("T2");
        let (manager, storage) = manager_with(refresher.clone());
        storage.set(REFRESH_TOKEN_KEY, "r1").unwrap();

        assert!(manager.refresh_token().await.is_none());

        assert_eq!(refresher.calls(), 0);
        assert!(storage.get(TOKEN_KEY).is_none());
    }

    #[tokio::test]
    async fn test_get_valid_token_refreshes_token_inside_margin() {
        let refresher = FakeRefresher::issuing("T2");
        let (manager, _storage) = manager_with(refresher.clone());
        manager.login(&token_expiring_in(120), "u1", Some("r1")).unwrap();

        assert_eq!(manager.get_valid_token().await.as_deref(), Some("T2"));
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_request() {
        let refresher = FakeRefresher::slow(Duration::from_millis(30), || {
            Ok(RefreshResponse {
                token: "T2".to_string(),
                refresh_token: None,
            })
        });
        let (manager, _storage) = manager_with(refresher.clone());
        manager
            .login(&token_expiring_in(-10), "u1", Some("r1"))
            .unwrap();

        let other = manager.clone();
        let (a, b, c) = tokio::join!(
            manager.get_valid_token(),
            manager.get_valid_token(),
            other.get_valid_token()
        );

        assert_eq!(a.as_deref(), Some("T2"));
        assert_eq!(b.as_deref(), Some("T2"));
        assert_eq!(c.as_deref(), Some("T2"));
        assert_eq!(refresher.calls(), 1);

        // The slot is released once the request completes
        manager.login(&token_expiring_in(-10), "u1", Some("r1")).unwrap();
        assert_eq!(manager.refresh_token().await.as_deref(), Some("T2"));
        assert_eq!(refresher.calls(), 2);
    }

    #[tokio::test]
    async fn test_is_token_expired_defaults_to_stored_token() {
        let (manager, _storage) = manager_with(FakeRefresher::issuing("unused"));
        assert!(manager.is_token_expired(None));

        manager.login(&token_expiring_in(3600), "u1", None).unwrap();
        assert!(!manager.is_token_expired(None));
        assert!(manager.is_token_expired(Some("garbage")));
        assert!(manager.token_expires_at().is_some());
    }

    // -------------------------------------------------------------------------
    // initialize
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_initialize_with_valid_token() {
        let refresher = FakeRefresher::issuing("unused");
        let (manager, storage) = manager_with(refresher.clone());
        seed(&storage, &token_expiring_in(3600), "u1", Some("r1"));
        assert!(manager.session().is_loading);

        let state = manager.initialize().await;

        assert_eq!(state, SessionState::Authenticated { user_id: "u1".to_string() });
        assert!(!manager.session().is_loading);
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn test_initialize_refreshes_expired_token() {
        let refresher = FakeRefresher::issuing("T2");
        let (manager, storage) = manager_with(refresher.clone());
        seed(&storage, &token_expiring_in(-10), "u1", Some("r1"));

        let state = manager.initialize().await;

        assert_eq!(state, SessionState::Authenticated { user_id: "u1".to_string() });
        assert_eq!(storage.get(TOKEN_KEY).as_deref(), Some("T2"));
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_initialize_clears_when_refresh_fails() {
        let refresher =
            FakeRefresher::new(|| Err(ApiError::InvalidResponse("expected JSON".to_string())));
        let (manager, storage) = manager_with(refresher);
        seed(&storage, &token_expiring_in(-10), "u1", Some("r1"));

        let state = manager.initialize().await;

        assert_eq!(state, SessionState::Unauthenticated);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_clears_expired_token_without_refresh_token() {
        let (manager, storage) = manager_with(FakeRefresher::issuing("unused"));
        seed(&storage, &token_expiring_in(-10), "u1", None);

        assert_eq!(manager.initialize().await, SessionState::Unauthenticated);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_without_credentials() {
        let (manager, storage) = manager_with(FakeRefresher::issuing("unused"));
        assert_eq!(manager.initialize().await, SessionState::Unauthenticated);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_discards_partial_credentials() {
        let (manager, storage) = manager_with(FakeRefresher::issuing("unused"));
        storage.set(USER_ID_KEY, "u1").unwrap();
        storage.set(REFRESH_TOKEN_KEY, "r1").unwrap();

        assert_eq!(manager.initialize().await, SessionState::Unauthenticated);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_discards_lone_refresh_token() {
        let refresher = FakeRefresher::issuing("T2");
        let (manager, storage) = manager_with(refresher.clone());
        storage.set(REFRESH_TOKEN_KEY, "r1").unwrap();

        assert_eq!(manager.initialize().await, SessionState::Unauthenticated);
        assert!(storage.is_empty());

        assert!(manager.refresh_token().await.is_none());
        assert!(storage.is_empty());
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn test_startup_refresh_rejection_stays_loading() {
        let refresher = FakeRefresher::new(rejected);
        let (manager, storage) = manager_with(refresher.clone());
        seed(&storage, &token_expiring_in(-10), "u1", Some("r1"));
        let rx = manager.subscribe();

        assert!(manager.refresh(false).await.is_none());

        assert_eq!(refresher.calls(), 1);
        assert!(storage.is_empty());
        assert!(!rx.has_changed().unwrap());
        assert!(manager.session().is_loading);

        assert_eq!(manager.initialize().await, SessionState::Unauthenticated);
        assert!(!manager.session().is_loading);
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let (manager, storage) = manager_with(FakeRefresher::issuing("unused"));
        seed(&storage, &token_expiring_in(3600), "u1", None);
        let mut rx = manager.subscribe();

        manager.initialize().await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            *rx.borrow_and_update(),
            SessionState::Authenticated { user_id: "u1".to_string() }
        );

        manager.logout();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), SessionState::Unauthenticated);
    }
}
