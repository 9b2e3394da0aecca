//! Route guarding driven by session state.
//!
//! The guard never inspects credentials itself. It reacts to
//! [`SessionState`] transitions published by the session manager and to
//! navigations published by a [`Router`], redirecting when a location does
//! not match the session.

use tokio::sync::watch;
use tracing::{debug, info};

use super::session::{Session, SessionState};

/// Login page, the target for unauthenticated redirects
pub const LOGIN_ROUTE: &str = "/login";

/// Routes reachable without a session
pub const PUBLIC_ROUTES: [&str; 3] = ["/login", "/register", "/verify"];

/// Where authenticated users land when they hit a public route
pub const DEFAULT_LANDING_ROUTE: &str = "/posts";

/// Current location, published on every navigation.
#[derive(Clone)]
pub struct Router {
    location: watch::Sender<String>,
}

impl Router {
    pub fn new(initial: impl Into<String>) -> Self {
        let (location, _) = watch::channel(initial.into());
        Self { location }
    }

    pub fn navigate(&self, path: impl Into<String>) {
        let path = path.into();
        debug!(path = %path, "Navigating");
        self.location.send_replace(path);
    }

    pub fn location(&self) -> String {
        self.location.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.location.subscribe()
    }
}

#[derive(Debug, Clone)]
pub struct RouteGuard {
    public_routes: Vec<String>,
    login_route: String,
    landing_route: String,
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self {
            public_routes: PUBLIC_ROUTES.iter().map(|r| r.to_string()).collect(),
            login_route: LOGIN_ROUTE.to_string(),
            landing_route: DEFAULT_LANDING_ROUTE.to_string(),
        }
    }
}

/// Strip query string, fragment and trailing slashes for matching
fn normalize(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let trimmed = path[..end].trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

impl RouteGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_landing_route(mut self, route: impl Into<String>) -> Self {
        self.landing_route = route.into();
        self
    }

    pub fn with_public_route(mut self, route: impl Into<String>) -> Self {
        self.public_routes.push(route.into());
        self
    }

    pub fn is_public(&self, location: &str) -> bool {
        let path = normalize(location);
        self.public_routes.iter().any(|r| normalize(r) == path)
    }

    /// Where `location` should redirect to for `session`, if anywhere.
    ///
    /// No decision is made while the session is still loading.
    pub fn redirect_for(&self, session: &Session, location: &str) -> Option<&str> {
        if session.is_loading {
            return None;
        }
        let public = self.is_public(location);
        if !session.is_authenticated && !public {
            Some(self.login_route.as_str())
        } else if session.is_authenticated && public {
            Some(self.landing_route.as_str())
        } else {
            None
        }
    }

    /// Re-evaluate on every session transition and every navigation.
    ///
    /// Returns once either the session manager or the router is gone.
    pub async fn run(self, mut session: watch::Receiver<SessionState>, router: Router) {
        let mut location = router.subscribe();
        loop {
            let current = Session::from(&*session.borrow_and_update());
            let path = location.borrow_and_update().clone();
            if let Some(target) = self.redirect_for(&current, &path) {
                if normalize(target) != normalize(&path) {
                    info!(from = %path, to = %target, "Route guard redirect");
                    router.navigate(target);
                    continue;
                }
            }

            tokio::select! {
                changed = session.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = location.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Route guard stopped");
    }
}
