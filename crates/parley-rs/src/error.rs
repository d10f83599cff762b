//! Error types for sessions, providers, tools, and configuration.
//!
//! Each capability boundary has its own enum. [`SessionError`] is what a
//! caller of [`Session::process_query`](crate::agent::session::Session::process_query)
//! sees; tool and token-counting failures never reach it.

use std::time::Duration;
use thiserror::Error;

/// Retry classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// HTTP 429 or a rate-limit error payload.
    RateLimited,
    /// HTTP 529 or an overload error payload.
    Overloaded,
    /// Everything else. Never retried.
    Other,
}

impl ErrorKind {
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::Overloaded)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::RateLimited => write!(f, "rate limit"),
            ErrorKind::Overloaded => write!(f, "server overload"),
            ErrorKind::Other => write!(f, "other"),
        }
    }
}

// ── Provider ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("{status} {body}")]
    Http { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to parse response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// HTTP status code, if the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify the failure for the retry policy.
    ///
    /// An HTTP status decides on its own. Failures without one are matched
    /// on the provider's error type names only.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Http { status: 429, .. } => ErrorKind::RateLimited,
            ProviderError::Http { status: 529, .. } => ErrorKind::Overloaded,
            ProviderError::Http { .. } => ErrorKind::Other,
            ProviderError::Request(msg) | ProviderError::Decode(msg) => {
                if msg.contains("rate_limit_error") {
                    ErrorKind::RateLimited
                } else if msg.contains("overloaded_error") {
                    ErrorKind::Overloaded
                } else {
                    ErrorKind::Other
                }
            }
        }
    }

    /// Whether the message points at a malformed conversation rather than
    /// a transport problem.
    pub fn is_structural(&self) -> bool {
        let msg = self.to_string();
        ["tool_use_id", "tool_result", "at least one message"]
            .iter()
            .any(|p| msg.contains(p))
    }
}

#[derive(Debug, Clone, Error)]
#[error("token counting failed: {0}")]
pub struct TokenCountError(pub String);

// ── Tools ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    NotFound(String),

    #[error("invalid arguments for '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("tool '{name}' timed out after {}s", .timeout.as_secs())]
    Timeout { name: String, timeout: Duration },

    #[error("{0}")]
    Execution(String),

    #[error("tool '{0}' panicked")]
    Panicked(String),
}

// ── Billing ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
#[error("failed to charge for token usage: {0}")]
pub struct BillingError(pub String);

// ── Session ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("{}", exhausted_message(.kind, .attempts))]
    RetriesExhausted { kind: ErrorKind, attempts: u32 },

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error(transparent)]
    Tools(#[from] ToolError),

    #[error("a query is already in progress for this session")]
    Busy,
}

fn exhausted_message(kind: &ErrorKind, attempts: &u32) -> String {
    match kind {
        ErrorKind::Overloaded => "Server is currently experiencing high load. Please try again \
             in a few moments or consider switching to a different model."
            .to_string(),
        _ => format!(
            "Rate limit exceeded after {attempts} attempts. Please try again in a few minutes \
             or consider switching to a different model"
        ),
    }
}

// ── Configuration ──────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
