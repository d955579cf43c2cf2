use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    /// Parse a role claim. Unknown values yield `None` ("no elevated access").
    pub fn from_claim(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Some(Role::Admin),
            "USER" => Some(Role::User),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::User => "USER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Denormalized identity of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub role: Role,
}

impl Principal {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Body returned by both the sign-in and the renewal endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGrant {
    #[serde(alias = "accessToken")]
    pub access_credential: String,
    #[serde(default, alias = "refreshToken")]
    pub renewal_credential: Option<String>,
    #[serde(alias = "user")]
    pub principal: Principal,
}

/// The authenticated state of this client.
///
/// The access credential and the principal live in the same value, so they
/// can only be set and cleared together.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub access_credential: String,
    pub renewal_credential: Option<String>,
    pub principal: Principal,
}

impl Session {
    pub fn from_grant(grant: SessionGrant) -> Self {
        Self {
            access_credential: grant.access_credential,
            renewal_credential: grant.renewal_credential,
            principal: grant.principal,
        }
    }
}

// Credentials stay out of logs and panic messages.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_credential", &"<redacted>")
            .field(
                "renewal_credential",
                &self.renewal_credential.as_ref().map(|_| "<redacted>"),
            )
            .field("principal", &self.principal)
            .finish()
    }
}

/// Shared, injectable holder of the current [`Session`].
///
/// Clone is cheap and every clone sees the same session. All writes replace
/// the whole value under one lock, so readers never observe a new renewal
/// credential paired with an old access credential.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<Option<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, session: Session) {
        *self.inner.write() = Some(session);
    }

    pub fn snapshot(&self) -> Option<Session> {
        self.inner.read().clone()
    }

    pub fn access_credential(&self) -> Option<String> {
        self.inner.read().as_ref().map(|s| s.access_credential.clone())
    }

    pub fn renewal_credential(&self) -> Option<String> {
        self.inner
            .read()
            .as_ref()
            .and_then(|s| s.renewal_credential.clone())
    }

    pub fn principal(&self) -> Option<Principal> {
        self.inner.read().as_ref().map(|s| s.principal.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Replace the session only if it still carries `expected_renewal`.
    ///
    /// Returns false when the session was cleared or replaced while the
    /// renewal was in flight; the stale result is then dropped.
    pub fn replace_if_current(&self, expected_renewal: &str, next: Session) -> bool {
        let mut guard = self.inner.write();
        let current = guard
            .as_ref()
            .and_then(|s| s.renewal_credential.as_deref());
        if current != Some(expected_renewal) {
            return false;
        }
        *guard = Some(next);
        true
    }

    /// Atomically remove and return the session.
    pub fn take(&self) -> Option<Session> {
        self.inner.write().take()
    }

    /// Atomically remove the session only if it still carries `presented`
    /// as its access or renewal credential.
    pub fn take_if_current(&self, presented: &str) -> Option<Session> {
        let mut guard = self.inner.write();
        let current = guard.as_ref().is_some_and(|s| {
            s.access_credential == presented || s.renewal_credential.as_deref() == Some(presented)
        });
        if current {
            guard.take()
        } else {
            None
        }
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }
}
