//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use parking_lot::Mutex;

use crate::api::RenewalClient;
use crate::auth::{
    Clearable, MemoryCookieSink, MirrorPropagator, Navigation, Navigator, Principal, Role,
    Session, SessionError, SessionGrant, SessionStore, TeardownSequencer,
};

/// Unsigned JWT-shaped credential with an arbitrary payload.
pub fn credential_with_claims(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

/// Credential expiring `expires_in_secs` from now (negative = already expired).
pub fn credential(expires_in_secs: i64, role: &str) -> String {
    credential_with_claims(serde_json::json!({
        "exp": Utc::now().timestamp() + expires_in_secs,
        "role": role,
    }))
}

pub fn principal(id: &str, role: Role) -> Principal {
    Principal {
        id: id.to_string(),
        name: None,
        email: None,
        role,
    }
}

pub fn session(access: &str, renewal: Option<&str>, role: Role) -> Session {
    Session {
        access_credential: access.to_string(),
        renewal_credential: renewal.map(str::to_string),
        principal: principal("u1", role),
    }
}

pub fn grant(access: &str, renewal: &str, role: Role) -> SessionGrant {
    SessionGrant {
        access_credential: access.to_string(),
        renewal_credential: Some(renewal.to_string()),
        principal: principal("u1", role),
    }
}

/// Sibling store stand-in that counts `clear()` calls.
#[derive(Default)]
pub struct CountingStore {
    pub clears: AtomicUsize,
}

impl CountingStore {
    pub fn count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl Clearable for CountingStore {
    fn name(&self) -> &str {
        "cart"
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

/// Navigator that records every signal it receives.
#[derive(Default)]
pub struct RecordingNavigator {
    pub signals: Mutex<Vec<Navigation>>,
}

impl RecordingNavigator {
    pub fn taken(&self) -> Vec<Navigation> {
        self.signals.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, to: Navigation) {
        self.signals.lock().push(to);
    }
}

/// Renewal client returning a scripted outcome and counting calls.
///
/// When a gate is set, each call waits on it before answering, which lets
/// tests pile up concurrent callers behind one in-flight renewal.
pub struct ScriptedRenewal {
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<String>>,
    outcome: Result<SessionGrant, SessionError>,
    gate: Option<Arc<tokio::sync::Notify>>,
}

impl ScriptedRenewal {
    pub fn succeeding(grant: SessionGrant) -> Self {
        Self::new(Ok(grant))
    }

    pub fn failing(error: SessionError) -> Self {
        Self::new(Err(error))
    }

    fn new(outcome: Result<SessionGrant, SessionError>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            outcome,
            gate: None,
        }
    }

    pub fn gated(mut self, gate: Arc<tokio::sync::Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenewalClient for ScriptedRenewal {
    async fn renew(&self, renewal_credential: &str) -> Result<SessionGrant, SessionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(renewal_credential.to_string());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.outcome.clone()
    }
}

/// Fully wired components around an in-memory cookie sink.
pub struct Harness {
    pub store: SessionStore,
    pub cookie: Arc<MemoryCookieSink>,
    pub mirror: MirrorPropagator,
    pub teardown: TeardownSequencer,
    pub cart: Arc<CountingStore>,
    pub navigator: Arc<RecordingNavigator>,
}

impl Harness {
    pub fn new() -> Self {
        let store = SessionStore::new();
        let cookie = Arc::new(MemoryCookieSink::default());
        let mirror = MirrorPropagator::new(cookie.clone());
        let navigator = Arc::new(RecordingNavigator::default());
        let teardown = TeardownSequencer::new(store.clone(), mirror.clone(), navigator.clone());
        let cart = Arc::new(CountingStore::default());
        teardown.register(cart.clone());

        Self {
            store,
            cookie,
            mirror,
            teardown,
            cart,
            navigator,
        }
    }
}

impl Harness {
    pub fn cookie_value(&self) -> Option<String> {
        use crate::auth::CookieSink;
        self.cookie.read()
    }
}
