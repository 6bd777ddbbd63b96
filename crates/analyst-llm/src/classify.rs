//! Maps raw provider failures onto [`ErrorKind`].
//!
//! Structured fields win over message text. Text matching only runs when the
//! client could not tell us the status.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use analyst_core::{ErrorKind, ProviderId};

use crate::error::ProviderError;

/// Wait used when a rate limit does not say how long to back off.
pub const DEFAULT_WAIT_SECONDS: u64 = 15;

lazy_static! {
    static ref TRY_AGAIN_MS: Option<Regex> =
        Regex::new(r"(?i)try again in\s+(\d+(?:\.\d+)?)\s*ms").ok();
    static ref TRY_AGAIN: Option<Regex> =
        Regex::new(r"(?i)try again in\s+(?:(\d+)m)?(\d+(?:\.\d+)?)s").ok();
    static ref MINUTES_SECONDS: Option<Regex> = Regex::new(r"(\d+)m(\d+(?:\.\d+)?)s").ok();
    static ref RETRY_AFTER: Option<Regex> =
        Regex::new(r"(?i)retry[- ]after[:\s]+(\d+(?:\.\d+)?)").ok();
    // A status code leading the message or following "status", "code",
    // "error" or "http", as a whole three-digit token.
    static ref TEXT_STATUS: Option<Regex> =
        Regex::new(r"(?i)(?:^|status|code|error|http)[^0-9a-z]{0,12}\b([1-5]\d{2})\b").ok();
}

fn captures<'t>(pattern: &Option<Regex>, text: &'t str) -> Option<Captures<'t>> {
    pattern.as_ref()?.captures(text)
}

const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
    "tokens per minute",
    "requests per minute",
];

const AUTH_MARKERS: &[&str] = &[
    "invalid api key",
    "invalid_api_key",
    "incorrect api key",
    "unauthorized",
    "authentication",
    "permission denied",
];

const TIMEOUT_MARKERS: &[&str] = &["timed out", "timeout", "deadline exceeded"];

/// Rounds a reported wait up to whole seconds, never below one.
pub fn round_wait(seconds: f64) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 1;
    }
    (seconds.ceil() as u64).max(1)
}

/// Extracts the wait a rate-limit message asks for.
pub fn parse_wait_seconds(message: &str) -> Option<u64> {
    if let Some(caps) = captures(&TRY_AGAIN_MS, message) {
        let millis: f64 = caps[1].parse().ok()?;
        return Some(round_wait(millis / 1000.0));
    }
    if let Some(caps) = captures(&TRY_AGAIN, message) {
        let minutes: f64 = caps
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0.0);
        let seconds: f64 = caps[2].parse().ok()?;
        return Some(round_wait(minutes * 60.0 + seconds));
    }
    if let Some(caps) = captures(&MINUTES_SECONDS, message) {
        let minutes: f64 = caps[1].parse().ok()?;
        let seconds: f64 = caps[2].parse().ok()?;
        return Some(round_wait(minutes * 60.0 + seconds));
    }
    if let Some(caps) = captures(&RETRY_AFTER, message) {
        let seconds: f64 = caps[1].parse().ok()?;
        return Some(round_wait(seconds));
    }
    None
}

/// Status code quoted in a message, e.g. "Error code: 429" or "401 Unauthorized".
pub fn parse_text_status(message: &str) -> Option<u16> {
    captures(&TEXT_STATUS, message)?[1].parse().ok()
}

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| haystack.contains(marker))
}

fn rate_limit(error: &ProviderError, default_wait: u64) -> ErrorKind {
    let wait_seconds = error
        .retry_after
        .map(round_wait)
        .or_else(|| parse_wait_seconds(&error.message))
        .unwrap_or(default_wait);
    ErrorKind::RateLimit { wait_seconds }
}

/// Classifies `error` raised while calling `provider`.
pub fn classify(error: &ProviderError, provider: ProviderId, default_wait: u64) -> ErrorKind {
    let auth = || ErrorKind::Auth {
        provider: provider.to_string(),
    };

    let from_status = |status: u16| match status {
        429 => Some(rate_limit(error, default_wait)),
        401 | 403 => Some(auth()),
        408 | 504 => Some(ErrorKind::Timeout),
        422 => Some(ErrorKind::Validation {
            reason: error.message.clone(),
        }),
        _ => None,
    };

    if let Some(kind) = error.status.and_then(&from_status) {
        return kind;
    }

    if let Some(code) = error.code.as_deref() {
        let code = code.to_ascii_lowercase();
        if code.contains("rate_limit") {
            return rate_limit(error, default_wait);
        }
        if code.contains("api_key") || code.contains("auth") {
            return auth();
        }
        if code.contains("timeout") {
            return ErrorKind::Timeout;
        }
    }

    if let Some(kind) = parse_text_status(&error.message).and_then(&from_status) {
        return kind;
    }

    let lowered = error.message.to_lowercase();
    if contains_any(&lowered, RATE_LIMIT_MARKERS) {
        rate_limit(error, default_wait)
    } else if contains_any(&lowered, AUTH_MARKERS) {
        auth()
    } else if contains_any(&lowered, TIMEOUT_MARKERS) {
        ErrorKind::Timeout
    } else {
        ErrorKind::Unknown {
            message: error.message.clone(),
        }
    }
}
