//! HTTP side of the session.
//!
//! This module provides the `ApiClient` request interceptor, which renews an
//! expired access credential before every call and attaches it as a bearer
//! header, and the `RenewalClient` seam for the remote renewal call.

pub mod client;
pub mod error;
pub mod renewal;

pub use client::ApiClient;
pub use error::ApiError;
pub use renewal::{HttpRenewalClient, RenewalClient};
