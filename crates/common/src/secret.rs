//! Secret wrapper and redaction for credential values

use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Number of leading characters kept when a credential is shown to operators.
pub const PREVIEW_LEN: usize = 10;

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Constant-time comparison against a presented value (admin bearer tokens).
    pub fn matches(&self, presented: &str) -> bool {
        self.0.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// Short preview of a credential for logs and stats: the first
/// [`PREVIEW_LEN`] characters followed by `...`.
///
/// Counts characters, not bytes, so multi-byte input never splits a code point.
pub fn redact(value: &str) -> String {
    let prefix: String = value.chars().take(PREVIEW_LEN).collect();
    format!("{prefix}...")
}
