//! The single path to a logged-out state.
//!
//! Every failure that invalidates the session ends here: renewal failures,
//! terminal 401 responses, and user sign-out. Dependent stores register a
//! [`Clearable`] at startup instead of being known to this module.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::mirror::MirrorPropagator;
use super::store::{Session, SessionStore};

/// A sibling store whose data is only meaningful for a signed-in principal.
pub trait Clearable: Send + Sync {
    fn name(&self) -> &str;
    fn clear(&self);
}

/// Navigation requests sent to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// Go to the sign-in entry point; `expired` asks for a "session expired" notice.
    SignIn { expired: bool },
    /// The signed-in principal may not open `route`.
    Unauthorized { route: String },
}

/// Fire-and-forget signal to the presentation layer.
pub trait Navigator: Send + Sync {
    fn navigate(&self, to: Navigation);
}

/// Delivers navigation signals over an unbounded channel.
pub struct ChannelNavigator {
    tx: mpsc::UnboundedSender<Navigation>,
}

impl ChannelNavigator {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Navigation>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Navigator for ChannelNavigator {
    fn navigate(&self, to: Navigation) {
        if let Err(e) = self.tx.send(to) {
            warn!(navigation = ?e.0, "Failed to send navigation - receiver closed");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// Renewal failed or was impossible.
    RenewalFailed,
    /// A protected call was answered with 401.
    Rejected,
    /// The user signed out.
    SignedOut,
}

impl TeardownReason {
    fn navigation(self) -> Navigation {
        match self {
            TeardownReason::SignedOut => Navigation::SignIn { expired: false },
            TeardownReason::RenewalFailed | TeardownReason::Rejected => {
                Navigation::SignIn { expired: true }
            }
        }
    }
}

struct Inner {
    store: SessionStore,
    mirror: MirrorPropagator,
    navigator: Arc<dyn Navigator>,
    dependents: RwLock<Vec<Arc<dyn Clearable>>>,
}

#[derive(Clone)]
pub struct TeardownSequencer {
    inner: Arc<Inner>,
}

impl TeardownSequencer {
    pub fn new(store: SessionStore, mirror: MirrorPropagator, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                mirror,
                navigator,
                dependents: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a store to be cleared on every teardown.
    pub fn register(&self, dependent: Arc<dyn Clearable>) {
        debug!(store = dependent.name(), "Registered dependent store");
        self.inner.dependents.write().push(dependent);
    }

    /// Tear the session down. Returns true if this call performed the
    /// teardown, false if there was no session left to tear down.
    ///
    /// The session is taken out of the store atomically, so concurrent
    /// callers collapse to one effective teardown. The session is gone before
    /// any dependent store is cleared.
    pub fn teardown(&self, reason: TeardownReason) -> bool {
        match self.inner.store.take() {
            Some(session) => self.finish(session, reason),
            None => {
                debug!(?reason, "Teardown skipped - no active session");
                false
            }
        }
    }

    /// Tear down only the session that `presented` belongs to. A rejection
    /// of a credential the session no longer holds leaves the newer session
    /// in place.
    pub fn teardown_if_current(&self, reason: TeardownReason, presented: &str) -> bool {
        match self.inner.store.take_if_current(presented) {
            Some(session) => self.finish(session, reason),
            None => {
                debug!(?reason, "Teardown skipped - credential no longer current");
                false
            }
        }
    }

    fn finish(&self, session: Session, reason: TeardownReason) -> bool {
        let dependents = self.inner.dependents.read().clone();
        for dependent in &dependents {
            debug!(store = dependent.name(), "Clearing dependent store");
            dependent.clear();
        }

        self.inner.mirror.sync(None);

        info!(
            ?reason,
            principal = %session.principal.id,
            cleared = dependents.len(),
            "Session torn down"
        );
        self.inner.navigator.navigate(reason.navigation());
        true
    }
}
