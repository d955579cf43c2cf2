//! sessionward core library.
//!
//! Keeps a short-lived access credential valid across many concurrent
//! outgoing requests:
//! - `auth`: session store, credential inspection, single-flight renewal,
//!   cookie mirror, teardown, and role-gated navigation
//! - `api`: the request interceptor and the remote renewal call
//! - `config`: persisted settings with environment overrides
//! - `context`: wiring of all of the above for one client

pub mod api;
pub mod auth;
pub mod config;
pub mod context;

pub use api::{ApiClient, ApiError, HttpRenewalClient, RenewalClient};
pub use auth::{
    AuthState, Clearable, GuardDecision, Navigation, Navigator, Principal, RenewalCoordinator,
    Role, RouteAccess, RouteGuard, Session, SessionError, SessionGrant, SessionStore,
    TeardownReason, TeardownSequencer,
};
pub use config::Config;
pub use context::SessionContext;

#[cfg(test)]
pub(crate) mod testing;
