//! Backend abstraction for outbound generation calls
//!
//! Defines the `Backend` trait that decouples the credential router from the
//! upstream model API. A backend receives the credential chosen for one attempt
//! plus the prompt, and either returns generated text or a `BackendError` whose
//! `kind()` tells the router how to react. Classification is plain data: the
//! router matches on `ErrorKind`, it never inspects concrete error types.

pub mod classify;
pub mod gemini;

pub use classify::{classify_error_body, classify_status};
pub use gemini::{GeminiBackend, GeminiConfig};

use std::future::Future;
use std::pin::Pin;

/// How the router should treat a failed attempt.
///
/// Both kinds rotate to another credential and count against the credential
/// that failed; they differ only in pacing:
/// - RateLimited fails over immediately
/// - Transient waits a short fixed backoff first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Quota or resource exhaustion for the credential used
    RateLimited,
    /// Anything else: service unavailable, timeouts, malformed responses
    Transient,
}

impl ErrorKind {
    /// Label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Transient => "transient",
        }
    }
}

/// Errors from a single backend invocation.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("backend error: {0}")]
    Other(String),
}

impl BackendError {
    /// Classification consumed by the router's retry loop.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::RateLimited(_) => ErrorKind::RateLimited,
            BackendError::Unavailable(_) | BackendError::Other(_) => ErrorKind::Transient,
        }
    }
}

/// Result alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Boxed future returned by [`Backend::invoke`].
pub type InvokeFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// Upstream generation operation.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Backend>`).
pub trait Backend: Send + Sync {
    /// Identifier for logging (e.g. "gemini")
    fn id(&self) -> &str;

    /// Run one generation call authenticated with `credential`.
    ///
    /// Implementations must not retry internally; the router owns rotation.
    fn invoke<'a>(&'a self, credential: &'a str, prompt: &'a str) -> InvokeFuture<'a>;
}
