//! Error types for pool and router operations

/// Errors that cross the pool/router boundary.
///
/// Per-attempt backend failures never appear here: the router absorbs them
/// into pool statistics and only reports `Exhausted` once every attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no credentials available in the pool")]
    EmptyPool,

    #[error(
        "all credentials exhausted: {attempts} attempts across {credentials} credentials \
         ({rate_limited} rate limited, {failed} failed)"
    )]
    Exhausted {
        attempts: usize,
        credentials: usize,
        rate_limited: usize,
        failed: usize,
    },

    #[error("credential source error: {0}")]
    Source(String),
}

impl Error {
    /// Stable machine-readable label for API responses and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Error::EmptyPool => "empty_pool",
            Error::Exhausted { .. } => "pool_exhausted",
            Error::Source(_) => "source_error",
        }
    }
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
