use thiserror::Error;

/// Failures that mean the session can no longer be trusted.
///
/// Clone is required: a single renewal outcome is handed to every caller
/// waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session expired - please sign in again")]
    SessionExpired,

    #[error("No renewal credential available")]
    MissingRenewalCredential,

    #[error("Renewal rejected by server: status {status}")]
    RenewalRejected { status: u16 },

    #[error("Renewal request failed: {0}")]
    Network(String),

    #[error("Invalid renewal response: {0}")]
    InvalidResponse(String),

    #[error("Renewed access credential is already expired")]
    StaleCredential,

    #[error("Renewal task aborted: {0}")]
    RenewalAborted(String),
}
