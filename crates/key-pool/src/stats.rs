//! Read-only statistics projection of the pool
//!
//! These types carry no behaviour; they are what the pool hands out to the
//! serving layer. Credentials only ever appear as a redacted preview.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::time::Instant;

use crate::record::CredentialRecord;

/// Per-credential statistics view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CredentialStats {
    /// Short prefix of the credential, never the full value
    pub key_preview: String,
    pub usage_count: u64,
    pub consecutive_errors: u32,
    /// Wall-clock time of the last selection or failure, unix milliseconds
    pub last_used_at: Option<u64>,
    pub active: bool,
    /// Inside the failure backoff window
    pub cooling: bool,
    pub cooldown_remaining_secs: u64,
}

impl CredentialStats {
    pub(crate) fn from_record(record: &CredentialRecord, now: Instant) -> Self {
        Self {
            key_preview: common::redact(record.id()),
            usage_count: record.usage_count(),
            consecutive_errors: record.consecutive_errors(),
            last_used_at: record.last_used().map(|t| unix_millis(now.saturating_duration_since(t))),
            active: record.active(),
            cooling: record.is_cooling(now),
            cooldown_remaining_secs: record.cooldown_remaining(now).as_secs(),
        }
    }
}

/// Overall pool health label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    /// Every active credential is eligible
    Healthy,
    /// Some active credentials are cooling down
    Degraded,
    /// No eligible credential
    Unhealthy,
}

/// Pool-wide summary plus the per-credential snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub status: PoolStatus,
    pub credentials_total: usize,
    pub credentials_active: usize,
    pub credentials_cooling: usize,
    pub credentials: Vec<CredentialStats>,
}

impl PoolStats {
    pub(crate) fn from_snapshot(credentials: Vec<CredentialStats>) -> Self {
        let total = credentials.len();
        let active = credentials.iter().filter(|c| c.active).count();
        let cooling = credentials.iter().filter(|c| c.active && c.cooling).count();

        let status = if active == 0 || cooling == active {
            PoolStatus::Unhealthy
        } else if cooling > 0 {
            PoolStatus::Degraded
        } else {
            PoolStatus::Healthy
        };

        Self {
            status,
            credentials_total: total,
            credentials_active: active,
            credentials_cooling: cooling,
            credentials,
        }
    }

    /// At least one active credential outside its backoff window.
    pub fn has_eligible(&self) -> bool {
        self.status != PoolStatus::Unhealthy
    }
}

/// Convert "this long ago" into an absolute unix timestamp in milliseconds.
fn unix_millis(ago: Duration) -> u64 {
    SystemTime::now()
        .checked_sub(ago)
        .unwrap_or(UNIX_EPOCH)
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
