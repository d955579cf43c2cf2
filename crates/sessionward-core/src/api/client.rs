//! Request interceptor for the storefront REST API.
//!
//! Every call made through `ApiClient` first waits for
//! [`RenewalCoordinator::ensure_valid`], then attaches the (possibly just
//! renewed) access credential as a bearer header. A 401 answer ends the
//! session through the teardown sequencer and is returned to the caller.

use std::time::Duration;

use reqwest::{header, Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use super::ApiError;
use crate::auth::{
    inspector, MirrorPropagator, Principal, RenewalCoordinator, Session, SessionError,
    SessionGrant, SessionStore, TeardownReason, TeardownSequencer,
};

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
/// 1 second is polite to the server while not making users wait too long.
const INITIAL_BACKOFF_MS: u64 = 1000;

const DEFAULT_SIGN_IN_PATH: &str = "/auth/login";
const DEFAULT_RENEWAL_PATH: &str = "/auth/refresh";

#[derive(Serialize)]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// API client that keeps its session valid.
/// Clone is cheap - every clone shares the connection pool and the session.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    sign_in_path: String,
    renewal_path: String,
    store: SessionStore,
    coordinator: RenewalCoordinator,
    mirror: MirrorPropagator,
    teardown: TeardownSequencer,
    max_retries: u32,
    initial_backoff: Duration,
}

impl ApiClient {
    pub fn new(
        client: Client,
        base_url: Url,
        store: SessionStore,
        coordinator: RenewalCoordinator,
        mirror: MirrorPropagator,
        teardown: TeardownSequencer,
    ) -> Self {
        Self {
            client,
            base_url,
            sign_in_path: DEFAULT_SIGN_IN_PATH.to_string(),
            renewal_path: DEFAULT_RENEWAL_PATH.to_string(),
            store,
            coordinator,
            mirror,
            teardown,
            max_retries: MAX_RATE_LIMIT_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }

    pub fn with_paths(mut self, sign_in_path: &str, renewal_path: &str) -> Self {
        self.sign_in_path = sign_in_path.to_string();
        self.renewal_path = renewal_path.to_string();
        self
    }

    pub fn with_retry_policy(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self
    }

    fn normalize(path: &str) -> &str {
        path.trim_start_matches('/')
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(Self::normalize(path))
            .map_err(|e| ApiError::InvalidRequest(format!("{}: {}", path, e)))
    }

    fn is_renewal_path(&self, path: &str) -> bool {
        let path = Self::normalize(path);
        let path = path.split('?').next().unwrap_or(path);
        path == Self::normalize(&self.renewal_path)
    }

    /// Credential to present for `path`. The renewal endpoint gets the
    /// renewal credential and skips the validity check, since renewing must
    /// not require a valid access credential.
    async fn bearer_for(&self, is_renewal: bool) -> Result<Option<String>, ApiError> {
        if is_renewal {
            return Ok(self.store.renewal_credential());
        }
        self.coordinator.ensure_valid().await?;
        Ok(self.store.access_credential())
    }

    /// Send a request through the interceptor and decode the JSON answer.
    pub async fn send<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.url(path)?;
        let is_renewal = self.is_renewal_path(path);
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let bearer = self.bearer_for(is_renewal).await?;

            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .header(header::ACCEPT, "application/json");
            if let Some(token) = &bearer {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS && retries < self.max_retries {
                retries += 1;
                warn!(
                    %method,
                    path,
                    retry = retries,
                    max_retries = self.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Rate limited, retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                continue;
            }

            if status == StatusCode::UNAUTHORIZED {
                // Only the session that sent the rejected credential ends
                match &bearer {
                    Some(token) => {
                        warn!(%method, path, "Request rejected with 401 - ending session");
                        self.teardown
                            .teardown_if_current(TeardownReason::Rejected, token);
                    }
                    None => debug!(%method, path, "Anonymous request rejected with 401"),
                }
                return Err(ApiError::Unauthorized);
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ApiError::from_status(status, &body));
            }

            debug!(%method, path, status = status.as_u16(), "Request succeeded");
            return Self::decode(response).await;
        }
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let bytes = response.bytes().await?;
        // Empty bodies (e.g. 204) decode as JSON null, so `()` and `Option<_>` work.
        let bytes: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &bytes
        };
        serde_json::from_slice(bytes).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send::<T, ()>(Method::GET, path, None).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(Method::POST, path, Some(body)).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(Method::PUT, path, Some(body)).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send::<T, ()>(Method::DELETE, path, None).await
    }

    /// Sign in and start a new session.
    ///
    /// A failed sign-in leaves any existing session untouched.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, ApiError> {
        let url = self.url(&self.sign_in_path)?;

        let response = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(&SignInRequest { email, password })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }

        let grant: SessionGrant = Self::decode(response).await?;
        if inspector::is_expired(Some(&grant.access_credential)) {
            return Err(SessionError::StaleCredential.into());
        }

        let session = Session::from_grant(grant);
        let principal = session.principal.clone();
        let access = session.access_credential.clone();

        self.store.set(session);
        self.mirror.sync(Some(&access));

        info!(principal = %principal.id, role = %principal.role, "Signed in");
        Ok(principal)
    }

    /// End the session at the user's request.
    pub fn sign_out(&self) -> bool {
        self.teardown.teardown(TeardownReason::SignedOut)
    }

    pub fn principal(&self) -> Option<Principal> {
        self.store.principal()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }
}
