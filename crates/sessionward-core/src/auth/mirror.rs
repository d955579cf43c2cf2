//! Cookie mirror of the access credential.
//!
//! Server-side route guards cannot see the in-memory session, so the access
//! credential is copied into a cookie. Writes always carry the full desired
//! value and are serialized, so last writer wins. The sink's current value is
//! the reference for skipping a write, since the server may also set the
//! cookie.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::cookie::{CookieStore, Jar};
use tracing::debug;
use url::Url;

/// Destination for the mirrored credential.
pub trait CookieSink: Send + Sync {
    fn write(&self, value: &str, max_age: Duration);
    fn remove(&self);
    fn read(&self) -> Option<String>;
}

/// Writes the mirror into the cookie jar an HTTP client sends with every
/// request to `url`.
pub struct JarCookieSink {
    jar: Arc<Jar>,
    url: Url,
    name: String,
}

impl JarCookieSink {
    pub fn new(jar: Arc<Jar>, url: Url, name: impl Into<String>) -> Self {
        Self {
            jar,
            url,
            name: name.into(),
        }
    }
}

impl CookieSink for JarCookieSink {
    fn write(&self, value: &str, max_age: Duration) {
        let cookie = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Strict",
            self.name,
            value,
            max_age.as_secs()
        );
        self.jar.add_cookie_str(&cookie, &self.url);
    }

    fn remove(&self) {
        let cookie = format!("{}=; Path=/; Max-Age=0", self.name);
        self.jar.add_cookie_str(&cookie, &self.url);
    }

    fn read(&self) -> Option<String> {
        let header = self.jar.cookies(&self.url)?;
        let header = header.to_str().ok()?;
        header.split(';').find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == self.name && !value.is_empty()).then(|| value.to_string())
        })
    }
}

/// In-process cookie slot, for embedders without an HTTP cookie jar.
#[derive(Default)]
pub struct MemoryCookieSink {
    value: Mutex<Option<String>>,
    writes: Mutex<usize>,
}

impl MemoryCookieSink {
    /// Number of writes and removals that reached this sink.
    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }
}

impl CookieSink for MemoryCookieSink {
    fn write(&self, value: &str, _max_age: Duration) {
        *self.value.lock() = Some(value.to_string());
        *self.writes.lock() += 1;
    }

    fn remove(&self) {
        *self.value.lock() = None;
        *self.writes.lock() += 1;
    }

    fn read(&self) -> Option<String> {
        self.value.lock().clone()
    }
}

/// Keeps the cookie mirror converged with the session's access credential.
#[derive(Clone)]
pub struct MirrorPropagator {
    sink: Arc<dyn CookieSink>,
    max_age: Duration,
    write_lock: Arc<Mutex<()>>,
}

/// Default cookie lifetime, matching a typical access credential lifetime.
const DEFAULT_MAX_AGE_SECS: u64 = 15 * 60;

impl MirrorPropagator {
    pub fn new(sink: Arc<dyn CookieSink>) -> Self {
        Self::with_max_age(sink, Duration::from_secs(DEFAULT_MAX_AGE_SECS))
    }

    pub fn with_max_age(sink: Arc<dyn CookieSink>, max_age: Duration) -> Self {
        Self {
            sink,
            max_age,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Write (or with `None`, delete) the mirror. A no-op when the sink
    /// already holds exactly that value.
    pub fn sync(&self, access_credential: Option<&str>) {
        let _guard = self.write_lock.lock();
        if self.sink.read().as_deref() == access_credential {
            debug!("Cookie mirror already current");
            return;
        }

        match access_credential {
            Some(value) => {
                self.sink.write(value, self.max_age);
                debug!(max_age_secs = self.max_age.as_secs(), "Cookie mirror written");
            }
            None => {
                self.sink.remove();
                debug!("Cookie mirror cleared");
            }
        }
    }

    /// Current mirror value as seen by request-time guards.
    pub fn current(&self) -> Option<String> {
        self.sink.read()
    }
}
