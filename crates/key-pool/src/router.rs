//! Request router: the select → invoke → classify → record loop
//!
//! One `generate` call makes up to `passes × active credentials` attempts.
//! Each attempt claims the currently best credential, runs the backend call
//! without holding the pool lock, then records the outcome. Rate-limited
//! failures rotate immediately; any other failure waits a short fixed backoff
//! first. Per-attempt errors are folded into pool statistics and never
//! returned to the caller.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use backend::{Backend, ErrorKind};
use common::redact;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::pool::CredentialPool;

/// Retry policy for [`RequestRouter`].
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Full passes over the active pool before giving up.
    pub passes: usize,
    /// Pause after a non-rate-limit failure.
    pub transient_backoff: Duration,
    /// Upper bound on a single backend call; expiry counts as a transient failure.
    pub attempt_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            passes: 2,
            transient_backoff: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

/// Routes generation requests across the credential pool.
pub struct RequestRouter {
    pool: Arc<CredentialPool>,
    backend: Arc<dyn Backend>,
    config: RouterConfig,
}

impl RequestRouter {
    pub fn new(pool: Arc<CredentialPool>, backend: Arc<dyn Backend>, config: RouterConfig) -> Self {
        Self {
            pool,
            backend,
            config,
        }
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// Generate a response for `prompt`, failing over between credentials.
    ///
    /// Returns `EmptyPool` without calling the backend when no credential is
    /// active, and `Exhausted` once every allotted attempt has failed.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let result = self.run(prompt).await;
        let label = match &result {
            Ok(_) => "ok",
            Err(Error::EmptyPool) => "empty_pool",
            Err(_) => "exhausted",
        };
        metrics::counter!("keypool_generate_total", "result" => label).increment(1);
        result
    }

    async fn run(&self, prompt: &str) -> Result<String> {
        let active = self.pool.active_len();
        if active == 0 {
            warn!("generate called with no active credentials");
            return Err(Error::EmptyPool);
        }

        let max_attempts = self.config.passes.max(1).saturating_mul(active);
        let mut tried: HashSet<String> = HashSet::new();
        let mut rate_limited = 0usize;
        let mut failed = 0usize;

        for attempt in 1..=max_attempts {
            // Selection is re-evaluated every attempt; a concurrent update may
            // have emptied the pool since the loop started.
            let claim = self.pool.claim()?;
            let credential = claim.id().to_string();
            tried.insert(credential.clone());

            let outcome = tokio::time::timeout(
                self.config.attempt_timeout,
                self.backend.invoke(&credential, prompt),
            )
            .await;

            let (kind, reason) = match outcome {
                Ok(Ok(text)) => {
                    claim.succeed();
                    metrics::counter!("keypool_attempts_total", "outcome" => "success")
                        .increment(1);
                    info!(
                        credential = %redact(&credential),
                        backend = self.backend.id(),
                        attempt,
                        "generation succeeded"
                    );
                    return Ok(text);
                }
                Ok(Err(e)) => (e.kind(), e.to_string()),
                Err(_) => (
                    ErrorKind::Transient,
                    format!(
                        "attempt timed out after {}s",
                        self.config.attempt_timeout.as_secs_f64()
                    ),
                ),
            };

            claim.fail();
            metrics::counter!("keypool_attempts_total", "outcome" => kind.label()).increment(1);
            warn!(
                credential = %redact(&credential),
                backend = self.backend.id(),
                attempt,
                max_attempts,
                kind = kind.label(),
                error = %reason,
                "attempt failed, rotating credential"
            );

            match kind {
                ErrorKind::RateLimited => rate_limited += 1,
                ErrorKind::Transient => {
                    failed += 1;
                    if attempt < max_attempts {
                        debug!(
                            backoff_ms = self.config.transient_backoff.as_millis() as u64,
                            "backing off before next attempt"
                        );
                        tokio::time::sleep(self.config.transient_backoff).await;
                    }
                }
            }
        }

        warn!(
            attempts = max_attempts,
            credentials = tried.len(),
            rate_limited,
            failed,
            "all credentials exhausted"
        );
        Err(Error::Exhausted {
            attempts: max_attempts,
            credentials: tried.len(),
            rate_limited,
            failed,
        })
    }
}
