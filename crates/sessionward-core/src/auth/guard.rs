//! Role-gated navigation.
//!
//! The authentication state is derived fresh on every check, never cached:
//! the role can only change through a new credential, and a cached answer
//! would outlive a teardown.

use tracing::debug;

use super::inspector;
use super::store::{Role, Session, SessionStore};
use super::teardown::{Navigation, Navigator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    AuthenticatedUser,
    AuthenticatedAdmin,
}

impl AuthState {
    /// State of the in-memory session, using the principal's role.
    pub fn from_session(session: Option<&Session>) -> Self {
        match session.map(|s| s.principal.role) {
            None => AuthState::Unauthenticated,
            Some(Role::Admin) => AuthState::AuthenticatedAdmin,
            Some(Role::User) => AuthState::AuthenticatedUser,
        }
    }

    /// State carried by a bare credential such as the cookie mirror. An
    /// expired or unreadable credential is unauthenticated, and a missing
    /// role claim grants no elevated access.
    pub fn from_credential(credential: Option<&str>) -> Self {
        let Some(credential) = credential else {
            return AuthState::Unauthenticated;
        };
        if inspector::is_expired(Some(credential)) {
            return AuthState::Unauthenticated;
        }
        match inspector::get_role(credential) {
            Some(Role::Admin) => AuthState::AuthenticatedAdmin,
            _ => AuthState::AuthenticatedUser,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    Public,
    Authenticated,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Permit,
    Redirect(Navigation),
}

/// Maps route prefixes to the access they require. Unlisted routes are public.
#[derive(Debug, Clone, Default)]
pub struct RouteGuard {
    routes: Vec<(String, RouteAccess)>,
}

impl RouteGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// The storefront's protected areas.
    pub fn with_default_routes() -> Self {
        Self::new()
            .protect("/admin", RouteAccess::Admin)
            .protect("/profile", RouteAccess::Authenticated)
            .protect("/orders", RouteAccess::Authenticated)
            .protect("/checkout", RouteAccess::Authenticated)
    }

    pub fn protect(mut self, prefix: impl Into<String>, access: RouteAccess) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim_end_matches('/').to_string();
        self.routes.push((prefix, access));
        self
    }

    /// Access required for `path`; the longest matching prefix wins.
    pub fn access_for(&self, path: &str) -> RouteAccess {
        self.routes
            .iter()
            .filter(|(prefix, _)| Self::matches(prefix, path))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, access)| *access)
            .unwrap_or(RouteAccess::Public)
    }

    fn matches(prefix: &str, path: &str) -> bool {
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
            None => false,
        }
    }

    pub fn decide(&self, state: AuthState, path: &str) -> GuardDecision {
        let decision = match (self.access_for(path), state) {
            (RouteAccess::Public, _) => GuardDecision::Permit,
            (_, AuthState::Unauthenticated) => {
                GuardDecision::Redirect(Navigation::SignIn { expired: false })
            }
            (RouteAccess::Authenticated, _) => GuardDecision::Permit,
            (RouteAccess::Admin, AuthState::AuthenticatedAdmin) => GuardDecision::Permit,
            (RouteAccess::Admin, AuthState::AuthenticatedUser) => {
                GuardDecision::Redirect(Navigation::Unauthorized {
                    route: path.to_string(),
                })
            }
        };
        debug!(path, ?state, ?decision, "Route guard decision");
        decision
    }

    /// Check a navigation against the current in-memory session.
    pub fn check_session(&self, store: &SessionStore, path: &str) -> GuardDecision {
        let session = store.snapshot();
        self.decide(AuthState::from_session(session.as_ref()), path)
    }

    /// Check a request against a bare credential (e.g. the cookie mirror).
    pub fn check(&self, credential: Option<&str>, path: &str) -> GuardDecision {
        self.decide(AuthState::from_credential(credential), path)
    }

    /// Evaluate a client-side navigation and signal a redirect if refused.
    /// Returns true if the navigation may proceed.
    pub fn navigate(&self, store: &SessionStore, navigator: &dyn Navigator, path: &str) -> bool {
        match self.check_session(store, path) {
            GuardDecision::Permit => true,
            GuardDecision::Redirect(to) => {
                navigator.navigate(to);
                false
            }
        }
    }
}
