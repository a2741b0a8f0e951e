//! Error classification for upstream generation responses
//!
//! Turns an HTTP status plus response body into a `BackendError`. Quota and
//! resource exhaustion map to `RateLimited` so the router fails over at once;
//! everything else is treated as transient.

use crate::BackendError;

/// Body markers that indicate per-credential quota exhaustion even when the
/// status code is not 429 (some gateways wrap upstream errors in a 400/403).
const RATE_LIMIT_PATTERNS: &[&str] = &[
    "resource_exhausted",
    "resource has been exhausted",
    "quota exceeded",
    "rate limit",
];

/// Classify an error body with no useful status code.
///
/// Returns `RateLimited` when any quota marker matches (case-insensitive),
/// otherwise `Other`.
pub fn classify_error_body(body: &str) -> BackendError {
    let lower = body.to_lowercase();
    if RATE_LIMIT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return BackendError::RateLimited(truncate(body));
    }
    BackendError::Other(truncate(body))
}

/// Classify an upstream error by HTTP status and response body.
///
/// 429 is always `RateLimited`. 502/503/504/408 are `Unavailable`. Other
/// statuses fall back to body inspection.
pub fn classify_status(status: u16, body: &str) -> BackendError {
    match status {
        429 => BackendError::RateLimited(format!("status 429: {}", truncate(body))),
        408 | 502 | 503 | 504 => {
            BackendError::Unavailable(format!("status {status}: {}", truncate(body)))
        }
        _ => match classify_error_body(body) {
            BackendError::RateLimited(msg) => {
                BackendError::RateLimited(format!("status {status}: {msg}"))
            }
            _ => BackendError::Other(format!("status {status}: {}", truncate(body))),
        },
    }
}

/// Upstream bodies can be large; keep error messages bounded.
fn truncate(body: &str) -> String {
    const MAX: usize = 256;
    if body.chars().count() <= MAX {
        return body.to_string();
    }
    let head: String = body.chars().take(MAX).collect();
    format!("{head}…")
}
