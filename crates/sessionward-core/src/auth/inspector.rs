//! Local decoding of access credential claims.
//!
//! Credentials are JWT-shaped (`header.payload.signature`). Only the payload
//! is read; signatures are the server's business. Every decode failure is
//! fail-closed: an unreadable credential is expired and carries no role.
//!
//! Claims are decoded on every call rather than memoized, so a decoded view
//! can never drift from the raw credential it came from.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use serde::Deserialize;

use super::store::Role;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Claims {
    /// Expiry as seconds since the Unix epoch.
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
}

pub fn decode_claims(credential: &str) -> Option<Claims> {
    let mut parts = credential.split('.');
    let (_header, payload) = (parts.next()?, parts.next()?);
    parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

pub fn get_expiry_millis(credential: &str) -> Option<i64> {
    decode_claims(credential)?.exp?.checked_mul(1000)
}

pub fn get_role(credential: &str) -> Option<Role> {
    decode_claims(credential)?
        .role
        .as_deref()
        .and_then(Role::from_claim)
}

/// True if the credential is absent, malformed, or its expiry is at or
/// before now.
pub fn is_expired(credential: Option<&str>) -> bool {
    match credential {
        Some(c) => expires_within(c, Duration::zero()),
        None => true,
    }
}

/// True if the credential expires within `leeway` from now (or is unreadable).
pub fn expires_within(credential: &str, leeway: Duration) -> bool {
    let now = Utc::now().timestamp_millis();
    is_expired_at(credential, now.saturating_add(leeway.num_milliseconds()))
}

fn is_expired_at(credential: &str, now_millis: i64) -> bool {
    match get_expiry_millis(credential) {
        Some(expiry) => expiry <= now_millis,
        None => true,
    }
}
