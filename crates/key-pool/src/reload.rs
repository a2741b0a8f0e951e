//! Reloading the pool from a credential source
//!
//! `reload` is the single path by which a source's credential set reaches the
//! pool, used at startup, by the admin endpoint and by the periodic task.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::Result;
use crate::pool::CredentialPool;
use crate::source::KeySource;

/// Fetch the current credential set and merge it into the pool.
///
/// Returns the pool size after the update. On fetch failure the pool is left
/// untouched.
pub async fn reload(pool: &CredentialPool, source: &dyn KeySource) -> Result<usize> {
    let keys = source.fetch().await?;
    pool.update(keys);
    Ok(pool.len())
}

/// Spawn a background task that reloads the pool every `interval`.
///
/// Failures are logged and retried on the next tick; the pool keeps its
/// previous credentials in the meantime.
pub fn spawn_reload_task(
    pool: Arc<CredentialPool>,
    source: Arc<dyn KeySource>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick; the caller loads at startup
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match reload(&pool, source.as_ref()).await {
                Ok(n) => info!(source = %source.describe(), credentials = n, "periodic reload complete"),
                Err(e) => warn!(source = %source.describe(), error = %e, "periodic reload failed"),
            }
        }
    })
}
