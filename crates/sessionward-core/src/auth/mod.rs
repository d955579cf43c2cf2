//! Authentication module for keeping a client-held session valid.
//!
//! This module provides:
//! - `SessionStore`: the in-memory access/renewal credential pair and principal
//! - `inspector`: local, fail-closed decoding of credential claims
//! - `RenewalCoordinator`: single-flight renewal of an expired access credential
//! - `MirrorPropagator`: copies the access credential into a cookie for route guards
//! - `TeardownSequencer`: the one path to a logged-out state
//! - `RouteGuard`: role-gated navigation decisions
//!
//! The session lives only in memory; it is created by sign-in or renewal and
//! destroyed by teardown.

pub mod coordinator;
pub mod error;
pub mod guard;
pub mod inspector;
pub mod mirror;
pub mod store;
pub mod teardown;

pub use coordinator::RenewalCoordinator;
pub use error::SessionError;
pub use guard::{AuthState, GuardDecision, RouteAccess, RouteGuard};
pub use mirror::{CookieSink, JarCookieSink, MemoryCookieSink, MirrorPropagator};
pub use store::{Principal, Role, Session, SessionGrant, SessionStore};
pub use teardown::{
    ChannelNavigator, Clearable, Navigation, Navigator, TeardownReason, TeardownSequencer,
};
