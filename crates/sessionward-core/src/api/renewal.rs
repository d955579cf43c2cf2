//! The remote renewal call.

use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::debug;
use url::Url;

use crate::auth::{SessionError, SessionGrant};

/// Exchanges a renewal credential for a fresh credential pair.
///
/// Implementations enforce their own timeout; a call that never resolves
/// stalls every request waiting on the renewal.
#[async_trait]
pub trait RenewalClient: Send + Sync {
    async fn renew(&self, renewal_credential: &str) -> Result<SessionGrant, SessionError>;
}

/// `POST <renewal endpoint>` with the renewal credential as bearer and no body.
pub struct HttpRenewalClient {
    client: Client,
    url: Url,
}

impl HttpRenewalClient {
    /// `client` should carry a request timeout.
    pub fn new(client: Client, url: Url) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl RenewalClient for HttpRenewalClient {
    async fn renew(&self, renewal_credential: &str) -> Result<SessionGrant, SessionError> {
        debug!(url = %self.url, "Sending renewal request");

        let response = self
            .client
            .post(self.url.clone())
            .header(header::ACCEPT, "application/json")
            .bearer_auth(renewal_credential)
            .send()
            .await
            .map_err(|e| SessionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::RenewalRejected {
                status: status.as_u16(),
            });
        }

        response
            .json::<SessionGrant>()
            .await
            .map_err(|e| SessionError::InvalidResponse(e.to_string()))
    }
}
