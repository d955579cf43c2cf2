//! Command parsing and execution for the interactive shell.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{info, warn};

use sessionward_core::auth::inspector;
use sessionward_core::{ApiError, Clearable, GuardDecision, Navigation, SessionContext};

/// Number of characters of a credential shown on screen
const CREDENTIAL_PREVIEW_CHARS: usize = 12;

/// Upper bound for `burst` so a typo cannot flood the server
const MAX_BURST: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login { email: Option<String> },
    Logout,
    WhoAmI,
    Request {
        method: Method,
        path: String,
        body: Option<Value>,
    },
    Burst { count: usize, path: String },
    Guard { path: String },
    Cookie,
    History,
    Help,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn takes_body(self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }
}

pub const HELP: &str = "\
Commands:
  login [email]               sign in (password is prompted)
  logout                      sign out and clear session state
  whoami                      show the signed-in principal
  get|delete <path>           send a request through the session
  post|put|patch <path> [json]
  burst <n> <path>            send n concurrent GETs (one renewal at most)
  guard <path>                check a route against the session and cookie
  cookie                      show the cookie mirror
  history                     paths requested during this session
  help | quit";

pub fn parse(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let path_arg = |rest: &str| -> Result<String> {
        let path = rest.split_whitespace().next().unwrap_or("");
        if path.is_empty() {
            return Err(anyhow!("Missing path"));
        }
        Ok(path.to_string())
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "login" => Command::Login {
            email: (!rest.is_empty()).then(|| rest.to_string()),
        },
        "logout" => Command::Logout,
        "whoami" => Command::WhoAmI,
        "get" | "delete" | "post" | "put" | "patch" => {
            let method = match word.to_ascii_lowercase().as_str() {
                "get" => Method::Get,
                "delete" => Method::Delete,
                "post" => Method::Post,
                "put" => Method::Put,
                _ => Method::Patch,
            };
            let (path, body) = match rest.split_once(char::is_whitespace) {
                Some((path, body)) => (path.to_string(), body.trim()),
                None => (path_arg(rest)?, ""),
            };
            let body = if body.is_empty() {
                None
            } else if method.takes_body() {
                Some(serde_json::from_str(body).context("Body is not valid JSON")?)
            } else {
                return Err(anyhow!("{} does not take a body", word));
            };
            Command::Request { method, path, body }
        }
        "burst" => {
            let (count, path) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("Usage: burst <n> <path>"))?;
            let count: usize = count.parse().context("Count must be a number")?;
            if count == 0 || count > MAX_BURST {
                return Err(anyhow!("Count must be between 1 and {}", MAX_BURST));
            }
            Command::Burst {
                count,
                path: path_arg(path)?,
            }
        }
        "guard" => Command::Guard {
            path: path_arg(rest)?,
        },
        "cookie" => Command::Cookie,
        "history" => Command::History,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(anyhow!("Unknown command: {} (try 'help')", other)),
    };
    Ok(Some(command))
}

/// Paths requested while signed in. Cleared on every teardown, like any
/// other state that belongs to the signed-in principal.
#[derive(Default)]
pub struct RequestHistory {
    paths: Mutex<Vec<String>>,
}

impl RequestHistory {
    pub fn record(&self, path: &str) {
        self.paths.lock().push(path.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.paths.lock().clone()
    }
}

impl Clearable for RequestHistory {
    fn name(&self) -> &str {
        "request-history"
    }

    fn clear(&self) {
        self.paths.lock().clear();
    }
}

pub fn preview(credential: &str) -> String {
    let shown: String = credential.chars().take(CREDENTIAL_PREVIEW_CHARS).collect();
    if shown.len() < credential.len() {
        format!("{}…", shown)
    } else {
        shown
    }
}

fn expiry_display(credential: &str) -> String {
    match inspector::get_expiry_millis(credential).and_then(DateTime::<Utc>::from_timestamp_millis) {
        Some(at) => {
            let remaining = at - Utc::now();
            if remaining.num_seconds() > 0 {
                format!("expires {} (in {}s)", at.format("%H:%M:%S"), remaining.num_seconds())
            } else {
                format!("expired {}", at.format("%H:%M:%S"))
            }
        }
        None => "no readable expiry".to_string(),
    }
}

pub fn describe_navigation(navigation: &Navigation) -> String {
    match navigation {
        Navigation::SignIn { expired: true } => {
            "→ sign-in (your session expired, please log in again)".to_string()
        }
        Navigation::SignIn { expired: false } => "→ sign-in".to_string(),
        Navigation::Unauthorized { route } => format!("→ unauthorized ({})", route),
    }
}

/// User-facing message for a failed request.
fn describe_error(error: &ApiError) -> String {
    match error {
        ApiError::Unauthorized => "Session rejected by server - signed out".to_string(),
        ApiError::Session(e) => format!("Session ended: {}", e),
        ApiError::NetworkError(e) if e.is_timeout() => {
            "Connection timed out. Please try again.".to_string()
        }
        ApiError::NetworkError(e) if e.is_connect() => {
            "Unable to connect to server. Check the API URL.".to_string()
        }
        other => other.to_string(),
    }
}

pub struct Shell {
    pub ctx: SessionContext,
    pub history: Arc<RequestHistory>,
}

impl Shell {
    pub fn new(ctx: SessionContext) -> Self {
        let history = Arc::new(RequestHistory::default());
        ctx.register(history.clone());
        Self { ctx, history }
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<()> {
        match self.ctx.api.sign_in(email, password).await {
            Ok(principal) => {
                println!("Signed in as {} ({})", principal.display_name(), principal.role);
                self.ctx.config.last_email = Some(email.to_string());
                if let Err(e) = self.ctx.config.save() {
                    warn!(error = %e, "Failed to save config");
                }
                Ok(())
            }
            Err(ApiError::Unauthorized) => Err(anyhow!("Invalid email or password")),
            Err(e) => Err(anyhow!(describe_error(&e))),
        }
    }

    pub fn logout(&self) {
        if !self.ctx.api.sign_out() {
            println!("Not signed in");
        }
    }

    pub fn whoami(&self) {
        match self.ctx.store.snapshot() {
            Some(session) => {
                let p = &session.principal;
                println!(
                    "{} <{}> id={} role={}",
                    p.display_name(),
                    p.email.as_deref().unwrap_or("-"),
                    p.id,
                    p.role
                );
                println!("access credential {}", expiry_display(&session.access_credential));
                println!(
                    "renewal credential {}",
                    if session.renewal_credential.is_some() { "present" } else { "missing" }
                );
                if self.ctx.coordinator.is_renewing() {
                    println!("renewal in flight");
                }
            }
            None => println!("Not signed in"),
        }
    }

    pub async fn request(&self, method: Method, path: &str, body: Option<&Value>) {
        let api = &self.ctx.api;
        let started = Instant::now();
        let result: Result<Value, ApiError> = match method {
            Method::Get => api.get(path).await,
            Method::Delete => api.delete(path).await,
            Method::Post => api.post(path, &body.cloned().unwrap_or(Value::Null)).await,
            Method::Put => api.put(path, &body.cloned().unwrap_or(Value::Null)).await,
            Method::Patch => api.patch(path, &body.cloned().unwrap_or(Value::Null)).await,
        };

        match result {
            Ok(value) => {
                if self.ctx.store.is_authenticated() {
                    self.history.record(path);
                }
                info!(
                    ?method,
                    path,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Request completed"
                );
                match serde_json::to_string_pretty(&value) {
                    Ok(text) => println!("{}", text),
                    Err(_) => println!("{}", value),
                }
            }
            Err(e) => println!("Error: {}", describe_error(&e)),
        }
    }

    pub async fn burst(&self, count: usize, path: &str) {
        let started = Instant::now();
        let requests = (0..count).map(|_| self.ctx.api.get::<Value>(path));
        let results = futures::future::join_all(requests).await;

        let failures: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        println!(
            "{} requests in {}ms: {} ok, {} failed",
            count,
            started.elapsed().as_millis(),
            count - failures.len(),
            failures.len()
        );
        if let Some(first) = failures.first() {
            println!("First failure: {}", describe_error(first));
        }
        if failures.len() < count && self.ctx.store.is_authenticated() {
            self.history.record(path);
        }
    }

    pub fn guard(&self, path: &str) {
        let session = self.ctx.guard.check_session(&self.ctx.store, path);
        let cookie = self.ctx.mirror.current();
        let server = self.ctx.guard.check(cookie.as_deref(), path);

        let show = |decision: &GuardDecision| match decision {
            GuardDecision::Permit => "permit".to_string(),
            GuardDecision::Redirect(to) => describe_navigation(to),
        };
        println!("client guard: {}", show(&session));
        println!("cookie guard: {}", show(&server));
    }

    pub fn cookie(&self) {
        match self.ctx.mirror.current() {
            Some(value) => println!(
                "{}={} ({})",
                self.ctx.config.cookie_name,
                preview(&value),
                expiry_display(&value)
            ),
            None => println!("No cookie mirror set"),
        }
    }

    pub fn show_history(&self) {
        let entries = self.history.entries();
        if entries.is_empty() {
            println!("No requests recorded this session");
        }
        for (i, path) in entries.iter().enumerate() {
            println!("{:>3}. {}", i + 1, path);
        }
    }
}
