//! Per-credential health and usage state
//!
//! A record is created zero-valued the first time its credential appears in a
//! pool update and lives until the credential disappears from one. The
//! selection score and the derived Eligible/Cooling state are both computed
//! from these fields at evaluation time; nothing about cooling is stored.

use std::time::Duration;

use tokio::time::Instant;

/// Backoff window added per consecutive failure.
pub const COOLDOWN_PER_ERROR: Duration = Duration::from_secs(60);

/// Score penalty per consecutive failure while inside the backoff window.
pub const PENALTY_PER_ERROR: f64 = 1000.0;

/// Idle time credited to a record that has never been claimed, large enough
/// to rank it ahead of any record that has been.
const NEVER_CLAIMED_IDLE_SECS: f64 = 1.0e9;

/// Health/usage state of one credential.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    id: String,
    pub(crate) active: bool,
    /// Last selection or last recorded failure, whichever came later.
    pub(crate) last_used: Option<Instant>,
    pub(crate) usage_count: u64,
    pub(crate) consecutive_errors: u32,
    /// Token of the claim that last stamped `last_used`, cleared by a failure.
    pub(crate) claim_token: Option<u64>,
}

impl CredentialRecord {
    pub fn new(id: String) -> Self {
        Self {
            id,
            active: true,
            last_used: None,
            usage_count: 0,
            consecutive_errors: 0,
            claim_token: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn last_used(&self) -> Option<Instant> {
        self.last_used
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Seconds since the last touch.
    pub fn idle_secs(&self, now: Instant) -> f64 {
        match self.last_used {
            Some(t) => now.saturating_duration_since(t).as_secs_f64(),
            None => NEVER_CLAIMED_IDLE_SECS,
        }
    }

    /// Length of the backoff window implied by the current failure streak.
    pub fn cooldown_window(&self) -> Duration {
        COOLDOWN_PER_ERROR * self.consecutive_errors
    }

    /// Time left in the backoff window, zero when eligible.
    pub fn cooldown_remaining(&self, now: Instant) -> Duration {
        match self.last_used {
            Some(t) if self.consecutive_errors > 0 => self
                .cooldown_window()
                .saturating_sub(now.saturating_duration_since(t)),
            _ => Duration::ZERO,
        }
    }

    /// Whether the failure penalty currently applies.
    pub fn is_cooling(&self, now: Instant) -> bool {
        !self.cooldown_remaining(now).is_zero()
    }

    /// Selection score; lower is picked first.
    ///
    /// `penalty + usage_count - idle_secs`, where the penalty is
    /// `1000 * consecutive_errors` inside the backoff window and 0 outside it.
    pub fn priority(&self, now: Instant) -> f64 {
        let penalty = if self.is_cooling(now) {
            PENALTY_PER_ERROR * f64::from(self.consecutive_errors)
        } else {
            0.0
        };
        penalty + self.usage_count as f64 - self.idle_secs(now)
    }

    pub(crate) fn mark_claimed(&mut self, now: Instant, token: u64) {
        self.last_used = Some(now);
        self.claim_token = Some(token);
    }

    /// Undo an unsettled claim, unless something touched the record since.
    pub(crate) fn unclaim(&mut self, token: u64, previous: Option<Instant>) -> bool {
        if self.claim_token != Some(token) {
            return false;
        }
        self.last_used = previous;
        self.claim_token = None;
        true
    }

    pub(crate) fn mark_success(&mut self) {
        self.usage_count += 1;
        self.consecutive_errors = 0;
    }

    pub(crate) fn mark_failure(&mut self, now: Instant) {
        self.consecutive_errors += 1;
        self.last_used = Some(now);
        self.claim_token = None;
    }
}
