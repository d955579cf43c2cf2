//! Single-flight renewal of the access credential.
//!
//! However many callers find the access credential expired at once, exactly
//! one renewal call is made and every caller receives its outcome. The
//! renewal runs as its own task, so it completes even if every caller stops
//! waiting.

use std::sync::Arc;

use chrono::Duration;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::error::SessionError;
use super::inspector;
use super::mirror::MirrorPropagator;
use super::store::{Session, SessionStore};
use super::teardown::{TeardownReason, TeardownSequencer};
use crate::api::RenewalClient;

type InFlight = Shared<BoxFuture<'static, Result<(), SessionError>>>;

struct Inner {
    store: SessionStore,
    client: Arc<dyn RenewalClient>,
    mirror: MirrorPropagator,
    teardown: TeardownSequencer,
    leeway: Duration,
    in_flight: Mutex<Option<InFlight>>,
}

/// Single-flight renewal around one session store.
///
/// Renewals are spawned on the ambient tokio runtime. Calling `ensure_valid`
/// with an expired credential outside a runtime fails with
/// `SessionError::RenewalAborted` and leaves the session untouched.
#[derive(Clone)]
pub struct RenewalCoordinator {
    inner: Arc<Inner>,
}

/// Empties the in-flight slot when dropped, on every exit path of a renewal.
struct SlotRelease<'a>(&'a Mutex<Option<InFlight>>);

impl Drop for SlotRelease<'_> {
    fn drop(&mut self) {
        self.0.lock().take();
    }
}

impl RenewalCoordinator {
    pub fn new(
        store: SessionStore,
        client: Arc<dyn RenewalClient>,
        mirror: MirrorPropagator,
        teardown: TeardownSequencer,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                mirror,
                teardown,
                leeway: Duration::zero(),
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Renew this long before the expiry claim instead of at it.
    ///
    /// Must be called before the coordinator is cloned or shared. A negative
    /// leeway is treated as zero.
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.leeway = leeway.max(Duration::zero());
        } else {
            warn!("Renewal leeway ignored - coordinator already shared");
        }
        self
    }

    /// Make sure the access credential is usable before a request goes out.
    ///
    /// Anonymous sessions and unexpired credentials resolve immediately. An
    /// expired credential starts a renewal, or joins the one in flight.
    pub async fn ensure_valid(&self) -> Result<(), SessionError> {
        if !self.inner.needs_renewal() {
            return Ok(());
        }

        let renewal = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(existing) => {
                    debug!("Joining in-flight renewal");
                    existing.clone()
                }
                None => {
                    // A renewal may have committed between the check above
                    // and taking the slot.
                    if !self.inner.needs_renewal() {
                        return Ok(());
                    }
                    let started = self.start_renewal()?;
                    *slot = Some(started.clone());
                    started
                }
            }
        };

        renewal.await
    }

    /// True while a renewal call is outstanding.
    pub fn is_renewing(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    // Called with the slot lock held; the spawned task cannot release the
    // slot until the caller has stored the handle in it.
    fn start_renewal(&self) -> Result<InFlight, SessionError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            warn!(error = %e, "Renewal needs a tokio runtime");
            SessionError::RenewalAborted(e.to_string())
        })?;

        info!("Access credential expired - starting renewal");
        let inner = Arc::clone(&self.inner);
        let task = runtime.spawn(async move { inner.renew().await });

        Ok(async move {
            task.await
                .unwrap_or_else(|e| Err(SessionError::RenewalAborted(e.to_string())))
        }
        .boxed()
        .shared())
    }
}

impl Inner {
    fn needs_renewal(&self) -> bool {
        match self.store.access_credential() {
            Some(access) => inspector::expires_within(&access, self.leeway),
            None => false,
        }
    }

    async fn renew(&self) -> Result<(), SessionError> {
        let release = SlotRelease(&self.in_flight);
        let used = self.store.renewal_credential();

        match self.exchange(used.as_deref()).await {
            Ok(true) => {
                let access = self.store.access_credential();
                self.mirror.sync(access.as_deref());
                info!("Renewal committed");
                drop(release);
                Ok(())
            }
            Ok(false) => {
                debug!("Session changed during renewal - result discarded");
                drop(release);
                self.current_outcome()
            }
            Err(e) if self.store.renewal_credential() != used => {
                debug!(error = %e, "Session changed during renewal - failure not applied");
                drop(release);
                self.current_outcome()
            }
            Err(e) => {
                warn!(error = %e, "Renewal failed");
                // Teardown runs before the slot empties so no caller can start
                // a second renewal with the dead credential.
                self.teardown.teardown(TeardownReason::RenewalFailed);
                drop(release);
                Err(e)
            }
        }
    }

    /// Outcome for waiters when the session was replaced or torn down while
    /// the renewal was in flight.
    fn current_outcome(&self) -> Result<(), SessionError> {
        if inspector::is_expired(self.store.access_credential().as_deref()) {
            Err(SessionError::SessionExpired)
        } else {
            Ok(())
        }
    }

    /// Exchange the renewal credential and commit the new pair. Returns false
    /// if the session no longer holds `renewal` and the result was dropped.
    async fn exchange(&self, renewal: Option<&str>) -> Result<bool, SessionError> {
        let renewal = renewal.ok_or(SessionError::MissingRenewalCredential)?;

        let grant = self.client.renew(renewal).await?;

        if inspector::is_expired(Some(&grant.access_credential)) {
            return Err(SessionError::StaleCredential);
        }
        if grant.renewal_credential.is_none() {
            return Err(SessionError::InvalidResponse(
                "missing renewal credential".to_string(),
            ));
        }

        Ok(self
            .store
            .replace_if_current(renewal, Session::from_grant(grant)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Navigation, Role};
    use crate::testing::{credential, grant, session, Harness, ScriptedRenewal};

    fn coordinator(h: &Harness, client: Arc<ScriptedRenewal>) -> RenewalCoordinator {
        RenewalCoordinator::new(h.store.clone(), client, h.mirror.clone(), h.teardown.clone())
    }

    #[tokio::test]
    async fn test_anonymous_resolves_immediately() {
        let h = Harness::new();
        let client = Arc::new(ScriptedRenewal::failing(SessionError::SessionExpired));
        let coordinator = coordinator(&h, client.clone());

        coordinator.ensure_valid().await.expect("anonymous is fine");
        assert_eq!(client.count(), 0);
        assert_eq!(h.cart.count(), 0);
    }

    #[tokio::test]
    async fn test_valid_credential_never_renews() {
        let h = Harness::new();
        let access = credential(600, "USER");
        h.store.set(session(&access, Some("r1"), Role::User));
        let client = Arc::new(ScriptedRenewal::failing(SessionError::SessionExpired));
        let coordinator = coordinator(&h, client.clone());

        for _ in 0..5 {
            coordinator.ensure_valid().await.expect("valid credential");
        }
        assert_eq!(client.count(), 0);
        assert_eq!(h.store.access_credential(), Some(access));
    }

    #[tokio::test]
    async fn test_renewal_success() {
        let h = Harness::new();
        h.store
            .set(session("expired-token", Some("valid-renewal"), Role::User));
        let new_token = credential(600, "USER");
        let client = Arc::new(ScriptedRenewal::succeeding(grant(
            &new_token,
            "new-renewal",
            Role::User,
        )));
        let coordinator = coordinator(&h, client.clone());

        coordinator.ensure_valid().await.expect("renewal succeeds");

        assert_eq!(client.count(), 1);
        assert_eq!(client.seen.lock().as_slice(), ["valid-renewal"]);
        assert_eq!(h.store.access_credential(), Some(new_token.clone()));
        assert_eq!(h.store.renewal_credential().as_deref(), Some("new-renewal"));
        assert_eq!(h.cookie_value(), Some(new_token));
        assert!(!coordinator.is_renewing());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight() {
        let h = Harness::new();
        h.store
            .set(session("expired-token", Some("valid-renewal"), Role::User));
        let gate = Arc::new(tokio::sync::Notify::new());
        let new_token = credential(600, "USER");
        let client = Arc::new(
            ScriptedRenewal::succeeding(grant(&new_token, "new-renewal", Role::User))
                .gated(gate.clone()),
        );
        let coordinator = coordinator(&h, client.clone());

        let callers: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = coordinator.clone();
                let store = h.store.clone();
                tokio::spawn(async move {
                    coordinator.ensure_valid().await?;
                    Ok::<_, SessionError>(store.snapshot())
                })
            })
            .collect();

        // Wait until the one renewal call is parked on the gate
        while client.count() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(coordinator.is_renewing());
        gate.notify_one();

        for caller in callers {
            let snapshot = caller
                .await
                .expect("caller task")
                .expect("renewal shared")
                .expect("session present");
            assert_eq!(snapshot.access_credential, new_token);
            assert_eq!(snapshot.renewal_credential.as_deref(), Some("new-renewal"));
        }
        assert_eq!(client.count(), 1);
        assert!(!coordinator.is_renewing());
    }

    #[tokio::test]
    async fn test_renewal_failure_cascades() {
        let h = Harness::new();
        h.store
            .set(session("expired-token", Some("invalid-renewal"), Role::User));
        h.mirror.sync(Some("expired-token"));
        let client = Arc::new(ScriptedRenewal::failing(SessionError::RenewalRejected {
            status: 401,
        }));
        let coordinator = coordinator(&h, client.clone());

        let err = coordinator.ensure_valid().await.expect_err("renewal fails");
        assert_eq!(err, SessionError::RenewalRejected { status: 401 });

        assert!(h.store.snapshot().is_none());
        assert_eq!(h.cookie_value(), None);
        assert_eq!(h.cart.count(), 1);
        assert_eq!(
            h.navigator.taken(),
            vec![Navigation::SignIn { expired: true }]
        );
        assert!(!coordinator.is_renewing());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failure_tears_down_once() {
        let h = Harness::new();
        h.store
            .set(session("expired-token", Some("invalid-renewal"), Role::User));
        let gate = Arc::new(tokio::sync::Notify::new());
        let client = Arc::new(
            ScriptedRenewal::failing(SessionError::Network("timed out".to_string()))
                .gated(gate.clone()),
        );
        let coordinator = coordinator(&h, client.clone());

        let callers: Vec<_> = (0..5)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.ensure_valid().await })
            })
            .collect();

        while client.count() == 0 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        let mut failed = 0;
        for caller in callers {
            match caller.await.expect("caller task") {
                Err(e) => {
                    assert_eq!(e, SessionError::Network("timed out".to_string()));
                    failed += 1;
                }
                // A caller scheduled after the teardown is simply anonymous
                Ok(()) => {}
            }
        }
        assert!(failed >= 1);
        assert_eq!(client.count(), 1);
        assert!(!h.store.is_authenticated());
        assert_eq!(h.cart.count(), 1);
        assert_eq!(h.navigator.taken().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_renewal_credential() {
        let h = Harness::new();
        h.store.set(session("expired-token", None, Role::User));
        let client = Arc::new(ScriptedRenewal::failing(SessionError::SessionExpired));
        let coordinator = coordinator(&h, client.clone());

        let err = coordinator.ensure_valid().await.expect_err("cannot renew");
        assert_eq!(err, SessionError::MissingRenewalCredential);
        assert_eq!(client.count(), 0);
        assert!(!h.store.is_authenticated());
        assert_eq!(h.cart.count(), 1);
    }

    #[tokio::test]
    async fn test_stale_renewed_credential_is_failure() {
        let h = Harness::new();
        h.store
            .set(session("expired-token", Some("valid-renewal"), Role::User));
        let still_expired = credential(-10, "USER");
        let client = Arc::new(ScriptedRenewal::succeeding(grant(
            &still_expired,
            "new-renewal",
            Role::User,
        )));
        let coordinator = coordinator(&h, client);

        let err = coordinator.ensure_valid().await.expect_err("stale grant");
        assert_eq!(err, SessionError::StaleCredential);
        assert!(!h.store.is_authenticated());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_teardown_during_renewal_is_not_undone() {
        let h = Harness::new();
        h.store
            .set(session("expired-token", Some("valid-renewal"), Role::User));
        let gate = Arc::new(tokio::sync::Notify::new());
        let client = Arc::new(
            ScriptedRenewal::succeeding(grant(&credential(600, "USER"), "new-renewal", Role::User))
                .gated(gate.clone()),
        );
        let coordinator = coordinator(&h, client.clone());

        let caller = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.ensure_valid().await })
        };
        while client.count() == 0 {
            tokio::task::yield_now().await;
        }

        h.teardown.teardown(TeardownReason::SignedOut);
        gate.notify_one();

        let result = caller.await.expect("caller task");
        assert_eq!(result, Err(SessionError::SessionExpired));
        assert!(!h.store.is_authenticated());
        assert_eq!(h.cookie_value(), None);
        assert_eq!(h.cart.count(), 1);
    }

    #[test]
    fn test_outside_runtime_fails_without_renewing() {
        let h = Harness::new();
        h.store
            .set(session("expired-token", Some("valid-renewal"), Role::User));
        let client = Arc::new(ScriptedRenewal::succeeding(grant(
            &credential(600, "USER"),
            "new-renewal",
            Role::User,
        )));
        let coordinator = coordinator(&h, client.clone());

        let result = futures::executor::block_on(coordinator.ensure_valid());
        assert!(matches!(result, Err(SessionError::RenewalAborted(_))));
        assert_eq!(client.count(), 0);
        assert!(!coordinator.is_renewing());
        assert_eq!(h.store.access_credential().as_deref(), Some("expired-token"));
        assert_eq!(h.cart.count(), 0);
    }

    #[tokio::test]
    async fn test_negative_leeway_is_zero() {
        let h = Harness::new();
        let access = credential(20, "USER");
        h.store.set(session(&access, Some("valid-renewal"), Role::User));
        let client = Arc::new(ScriptedRenewal::failing(SessionError::SessionExpired));
        let coordinator =
            coordinator(&h, client.clone()).with_leeway(Duration::seconds(-60));

        coordinator.ensure_valid().await.expect("still valid");
        assert_eq!(client.count(), 0);
        assert_eq!(h.store.access_credential(), Some(access));
    }

    #[tokio::test]
    async fn test_leeway_renews_early() {
        let h = Harness::new();
        h.store
            .set(session(&credential(20, "USER"), Some("valid-renewal"), Role::User));
        let new_token = credential(600, "USER");
        let client = Arc::new(ScriptedRenewal::succeeding(grant(
            &new_token,
            "new-renewal",
            Role::User,
        )));
        let coordinator =
            coordinator(&h, client.clone()).with_leeway(Duration::seconds(60));

        coordinator.ensure_valid().await.expect("early renewal");
        assert_eq!(client.count(), 1);
        assert_eq!(h.store.access_credential(), Some(new_token));
    }

    #[tokio::test]
    async fn test_renews_again_after_completion() {
        let h = Harness::new();
        h.store
            .set(session("expired-token", Some("r1"), Role::User));
        // The grant is itself valid, so a second ensure_valid is a no-op.
        let client = Arc::new(ScriptedRenewal::succeeding(grant(
            &credential(600, "USER"),
            "r2",
            Role::User,
        )));
        let coordinator = coordinator(&h, client.clone());

        coordinator.ensure_valid().await.expect("first renewal");
        coordinator.ensure_valid().await.expect("already valid");
        assert_eq!(client.count(), 1);

        // Expire it again: a new renewal starts from a fresh slot.
        h.store.set(session("expired-again", Some("r2"), Role::User));
        coordinator.ensure_valid().await.expect("second renewal");
        assert_eq!(client.count(), 2);
        assert_eq!(client.seen.lock().as_slice(), ["r1", "r2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_renewal_spares_newer_session() {
        let h = Harness::new();
        h.store
            .set(session("expired-token", Some("old-renewal"), Role::User));
        let gate = Arc::new(tokio::sync::Notify::new());
        let client = Arc::new(
            ScriptedRenewal::failing(SessionError::RenewalRejected { status: 401 })
                .gated(gate.clone()),
        );
        let coordinator = coordinator(&h, client.clone());

        let caller = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.ensure_valid().await })
        };
        while client.count() == 0 {
            tokio::task::yield_now().await;
        }

        // The user signs in again while the old renewal is still out
        let fresh = credential(600, "ADMIN");
        h.store.set(session(&fresh, Some("fresh-renewal"), Role::Admin));
        gate.notify_one();

        caller
            .await
            .expect("caller task")
            .expect("newer session is valid");
        assert_eq!(h.store.access_credential(), Some(fresh));
        assert_eq!(h.cart.count(), 0);
        assert!(h.navigator.taken().is_empty());
    }
}
