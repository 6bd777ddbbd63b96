use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Normalized failure taxonomy for a single operation.
///
/// Raw provider errors are classified into one of these variants at the
/// boundary; nothing downstream looks at provider error text again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimit { wait_seconds: u64 },
    Auth { provider: String },
    Timeout,
    Unknown { message: String },
    Cancelled,
    Validation { reason: String },
}

impl ErrorKind {
    /// Short, user-facing hint for the presentation layer.
    pub fn remediation(&self) -> &'static str {
        match self {
            ErrorKind::RateLimit { .. } => {
                "Rate limit reached: reduce the token limit or switch to an unrestricted provider."
            }
            ErrorKind::Auth { .. } => "Authentication failed: check the provider API key.",
            ErrorKind::Timeout => "The provider timed out: try again or ask a narrower question.",
            ErrorKind::Unknown { .. } => "The provider returned an unexpected error: try again.",
            ErrorKind::Cancelled => "The request was cancelled before it finished.",
            ErrorKind::Validation { .. } => {
                "The request does not fit the loaded dataset: check the question and columns."
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::RateLimit { .. } => "rate_limit",
            ErrorKind::Auth { .. } => "auth",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unknown { .. } => "unknown",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Validation { .. } => "validation",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::RateLimit { wait_seconds } => {
                write!(f, "rate limited (retry in {}s)", wait_seconds)
            }
            ErrorKind::Auth { provider } => write!(f, "authentication failed for {}", provider),
            ErrorKind::Timeout => write!(f, "timed out"),
            ErrorKind::Unknown { message } => write!(f, "unknown error: {}", message),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::Validation { reason } => write!(f, "invalid request: {}", reason),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid provider config: {0}")]
    InvalidProvider(String),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(String),
}

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Memory I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Memory serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
