//! Wiring for one client's session.
//!
//! `SessionContext` builds the session store, cookie mirror, teardown
//! sequencer, renewal coordinator and API client around a single HTTP client
//! and cookie jar, so each context is an isolated "tab".

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::cookie::Jar;
use reqwest::Client;
use tracing::debug;

use crate::api::{ApiClient, HttpRenewalClient};
use crate::auth::{
    Clearable, JarCookieSink, MirrorPropagator, Navigator, RenewalCoordinator, RouteGuard,
    SessionStore, TeardownSequencer,
};
use crate::config::Config;

pub struct SessionContext {
    pub config: Config,
    pub store: SessionStore,
    pub mirror: MirrorPropagator,
    pub teardown: TeardownSequencer,
    pub coordinator: RenewalCoordinator,
    pub api: ApiClient,
    pub guard: RouteGuard,
}

impl SessionContext {
    pub fn new(config: Config, navigator: Arc<dyn Navigator>) -> Result<Self> {
        let base_url = config.base_url()?;
        let leeway = config.renewal_leeway()?;
        let renewal_url = config.endpoint(&config.renewal_path)?;

        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .cookie_provider(jar.clone())
            .build()
            .context("Failed to build HTTP client")?;

        let store = SessionStore::new();
        let sink = Arc::new(JarCookieSink::new(jar, base_url.clone(), &config.cookie_name));
        let mirror = MirrorPropagator::with_max_age(
            sink,
            Duration::from_secs(config.cookie_max_age_secs),
        );
        let teardown = TeardownSequencer::new(store.clone(), mirror.clone(), navigator);

        let renewal = Arc::new(HttpRenewalClient::new(client.clone(), renewal_url));
        let coordinator =
            RenewalCoordinator::new(store.clone(), renewal, mirror.clone(), teardown.clone())
                .with_leeway(leeway);

        let api = ApiClient::new(
            client,
            base_url,
            store.clone(),
            coordinator.clone(),
            mirror.clone(),
            teardown.clone(),
        )
        .with_paths(&config.sign_in_path, &config.renewal_path)
        .with_retry_policy(
            config.max_rate_limit_retries,
            Duration::from_millis(config.initial_backoff_ms),
        );

        debug!(api = %config.api_base_url, "Session context ready");

        Ok(Self {
            config,
            store,
            mirror,
            teardown,
            coordinator,
            api,
            guard: RouteGuard::with_default_routes(),
        })
    }

    /// Register a store to be cleared whenever the session is torn down.
    pub fn register(&self, dependent: Arc<dyn Clearable>) {
        self.teardown.register(dependent);
    }
}
