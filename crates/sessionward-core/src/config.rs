//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: where the
//! API lives, which endpoints sign in and renew, and how the cookie mirror
//! and request retries behave.
//!
//! Configuration is stored at `~/.config/sessionward/config.json`. Any field
//! missing from the file takes its default, and `SESSIONWARD_*` environment
//! variables override the file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Application name used for config directory paths
const APP_NAME: &str = "sessionward";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment overrides, applied after the file is read.
const ENV_API_URL: &str = "SESSIONWARD_API_URL";
const ENV_SIGN_IN_PATH: &str = "SESSIONWARD_SIGN_IN_PATH";
const ENV_RENEWAL_PATH: &str = "SESSIONWARD_RENEWAL_PATH";
const ENV_COOKIE_NAME: &str = "SESSIONWARD_COOKIE_NAME";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub sign_in_path: String,
    pub renewal_path: String,
    /// Name of the cookie mirroring the access credential.
    pub cookie_name: String,
    /// Lifetime of the cookie mirror.
    pub cookie_max_age_secs: u64,
    /// Per-request timeout, including the renewal call.
    /// 30s allows for slow API responses while failing fast enough for good UX.
    pub request_timeout_secs: u64,
    /// Renew this many seconds before the expiry claim.
    pub renewal_leeway_secs: i64,
    /// Maximum number of retries for rate-limited (429) requests.
    pub max_rate_limit_retries: u32,
    /// Initial backoff delay in milliseconds for rate limiting; doubles per retry.
    pub initial_backoff_ms: u64,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api/".to_string(),
            sign_in_path: "/auth/login".to_string(),
            renewal_path: "/auth/refresh".to_string(),
            cookie_name: "accessToken".to_string(),
            cookie_max_age_secs: 15 * 60,
            request_timeout_secs: 30,
            renewal_leeway_secs: 0,
            max_rate_limit_retries: 3,
            initial_backoff_ms: 1000,
            last_email: None,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fields = [
            (ENV_API_URL, &mut self.api_base_url),
            (ENV_SIGN_IN_PATH, &mut self.sign_in_path),
            (ENV_RENEWAL_PATH, &mut self.renewal_path),
            (ENV_COOKIE_NAME, &mut self.cookie_name),
        ];
        for (key, field) in fields {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *field = value.trim().to_string();
            }
        }
    }

    /// The API base URL, always ending in `/` so relative paths join beneath it.
    pub fn base_url(&self) -> Result<Url> {
        let mut raw = self.api_base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).with_context(|| format!("Invalid API base URL: {}", self.api_base_url))
    }

    /// How long before expiry the coordinator renews. Rejects negative or
    /// unrepresentable values instead of clamping them.
    pub fn renewal_leeway(&self) -> Result<chrono::Duration> {
        let secs = self.renewal_leeway_secs;
        if secs < 0 {
            bail!("renewal_leeway_secs must not be negative: {}", secs);
        }
        chrono::Duration::try_seconds(secs)
            .with_context(|| format!("renewal_leeway_secs out of range: {}", secs))
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let base = self.base_url()?;
        base.join(path.trim_start_matches('/'))
            .with_context(|| format!("Invalid endpoint path: {}", path))
    }
}
