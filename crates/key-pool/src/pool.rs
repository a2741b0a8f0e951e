//! Credential pool: merge-on-update and priority-based selection
//!
//! The pool holds one `CredentialRecord` per credential plus the current
//! selection order. Every selection re-scores the active credentials, re-sorts
//! the order (lowest score first), takes the head and stamps it as claimed, all
//! under one lock so two concurrent callers never claim the same best
//! credential without seeing each other's stamp.
//!
//! The lock is a `std::sync::Mutex`: every critical section is short and
//! synchronous, and an unsettled `Claim` has to be able to roll back from
//! `Drop` without awaiting.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use common::redact;
use rand::seq::SliceRandom;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::CredentialRecord;
use crate::stats::{CredentialStats, PoolStats};

#[derive(Debug, Default)]
struct PoolState {
    records: HashMap<String, CredentialRecord>,
    /// Active credential ids, best candidate first after each selection.
    active_order: Vec<String>,
    next_claim_token: u64,
}

impl PoolState {
    /// Rebuild the selection order from the active records, shuffled so a
    /// freshly loaded pool with uniform stats has no fixed first pick.
    fn rebuild_order(&mut self) {
        let mut order: Vec<String> = self
            .records
            .values()
            .filter(|r| r.active())
            .map(|r| r.id().to_string())
            .collect();
        order.shuffle(&mut rand::rng());
        self.active_order = order;
    }
}

/// In-memory pool of interchangeable credentials.
///
/// Shared via `Arc` between the router, the reload task and the stats endpoint.
#[derive(Debug, Default)]
pub struct CredentialPool {
    state: Mutex<PoolState>,
}

impl CredentialPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool seeded with an initial credential set.
    pub fn with_credentials<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pool = Self::new();
        pool.update(ids);
        pool
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        // Every critical section leaves the state consistent, so a panic in
        // another holder does not invalidate it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the credential set, keeping stats for credentials that stay.
    ///
    /// Credentials absent from `ids` are dropped together with their stats.
    /// New credentials start zero-valued and active. Empty strings and
    /// duplicates are ignored. The selection order is rebuilt and shuffled.
    pub fn update<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state();
        let mut previous = std::mem::take(&mut state.records);
        let mut records = HashMap::with_capacity(previous.len());
        let mut added = 0usize;

        for id in ids {
            let id: String = id.into();
            if id.is_empty() || records.contains_key(&id) {
                continue;
            }
            let record = match previous.remove(&id) {
                Some(existing) => existing,
                None => {
                    added += 1;
                    CredentialRecord::new(id.clone())
                }
            };
            records.insert(id, record);
        }

        let removed = previous.len();
        state.records = records;
        state.rebuild_order();

        let total = state.records.len();
        let active = state.active_order.len();
        drop(state);

        metrics::gauge!("keypool_credentials").set(total as f64);
        info!(
            credentials = total,
            active, added, removed, "credential pool updated"
        );
    }

    /// Pick the best credential and stamp it as claimed.
    ///
    /// The stamp stands even if the caller never reports an outcome; use
    /// [`claim`](Self::claim) to get a guard that rolls it back instead.
    pub fn select(&self) -> Result<String> {
        let (id, _, _) = self.claim_next()?;
        Ok(id)
    }

    /// Pick the best credential and return a guard for reporting the outcome.
    ///
    /// Dropping the guard without calling [`Claim::succeed`] or
    /// [`Claim::fail`] (e.g. the caller's future was cancelled) restores the
    /// credential's previous `last_used` stamp, unless another caller has
    /// touched the credential since.
    pub fn claim(&self) -> Result<Claim<'_>> {
        let (id, previous, token) = self.claim_next()?;
        Ok(Claim {
            pool: self,
            id,
            previous,
            token,
            settled: false,
        })
    }

    /// Score, re-sort, take the head and stamp it. Returns the id, the
    /// stamp it replaced and the claim token.
    fn claim_next(&self) -> Result<(String, Option<Instant>, u64)> {
        let now = Instant::now();
        let mut guard = self.state();
        let state = &mut *guard;

        if state.active_order.is_empty() {
            return Err(Error::EmptyPool);
        }

        let mut scored: Vec<(f64, String)> = state
            .active_order
            .drain(..)
            .map(|id| {
                let score = state
                    .records
                    .get(&id)
                    .map_or(f64::INFINITY, |r| r.priority(now));
                (score, id)
            })
            .collect();
        // Stable: ties keep their previous (initially shuffled) order.
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        let best_score = scored[0].0;
        state.active_order = scored.into_iter().map(|(_, id)| id).collect();

        let id = state.active_order[0].clone();
        state.next_claim_token += 1;
        let token = state.next_claim_token;

        let Some(record) = state.records.get_mut(&id) else {
            // Order and records are rebuilt together; this only trips if
            // that invariant is broken.
            warn!(credential = %redact(&id), "selection order out of sync, rebuilding");
            state.rebuild_order();
            return Err(Error::EmptyPool);
        };
        let previous = record.last_used();
        record.mark_claimed(now, token);

        debug!(credential = %redact(&id), priority = best_score, "credential selected");
        Ok((id, previous, token))
    }

    /// Count a successful completion. Returns false if the credential is no
    /// longer in the pool.
    pub fn record_success(&self, id: &str) -> bool {
        let mut state = self.state();
        match state.records.get_mut(id) {
            Some(record) => {
                record.mark_success();
                debug!(
                    credential = %redact(id),
                    usage_count = record.usage_count(),
                    "credential succeeded"
                );
                true
            }
            None => {
                debug!(credential = %redact(id), "success for credential no longer in pool");
                false
            }
        }
    }

    /// Count a failed attempt and stamp the failure time. Returns false if
    /// the credential is no longer in the pool.
    pub fn record_failure(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state();
        match state.records.get_mut(id) {
            Some(record) => {
                record.mark_failure(now);
                debug!(
                    credential = %redact(id),
                    consecutive_errors = record.consecutive_errors(),
                    cooldown_secs = record.cooldown_window().as_secs(),
                    "credential failed"
                );
                true
            }
            None => {
                debug!(credential = %redact(id), "failure for credential no longer in pool");
                false
            }
        }
    }

    /// Toggle administrative eligibility. Inactive credentials keep their
    /// stats but are never selected. Returns false if the credential is unknown.
    pub fn set_active(&self, id: &str, active: bool) -> bool {
        let mut state = self.state();
        let Some(record) = state.records.get_mut(id) else {
            return false;
        };
        if record.active == active {
            return true;
        }
        record.active = active;
        if active {
            state.active_order.push(id.to_string());
        } else {
            state.active_order.retain(|k| k != id);
        }
        info!(credential = %redact(id), active, "credential eligibility changed");
        true
    }

    fn release_unsettled(&self, id: &str, previous: Option<Instant>, token: u64) {
        let mut state = self.state();
        if let Some(record) = state.records.get_mut(id)
            && record.unclaim(token, previous)
        {
            debug!(credential = %redact(id), "unsettled claim rolled back");
        }
    }

    /// Credentials whose redacted preview equals `preview`, sorted.
    pub fn ids_with_preview(&self, preview: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .state()
            .records
            .keys()
            .filter(|id| redact(id) == preview)
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Clone of one credential's record.
    pub fn record(&self, id: &str) -> Option<CredentialRecord> {
        self.state().records.get(id).cloned()
    }

    /// Per-credential stats: active credentials in current selection order,
    /// then inactive ones. Pure read.
    pub fn snapshot(&self) -> Vec<CredentialStats> {
        let now = Instant::now();
        let state = self.state();

        let mut out: Vec<CredentialStats> = state
            .active_order
            .iter()
            .filter_map(|id| state.records.get(id))
            .map(|r| CredentialStats::from_record(r, now))
            .collect();

        let mut inactive: Vec<CredentialStats> = state
            .records
            .values()
            .filter(|r| !r.active())
            .map(|r| CredentialStats::from_record(r, now))
            .collect();
        inactive.sort_by(|a, b| a.key_preview.cmp(&b.key_preview));
        out.extend(inactive);
        out
    }

    /// Pool summary plus snapshot, for health and stats endpoints.
    pub fn stats(&self) -> PoolStats {
        PoolStats::from_snapshot(self.snapshot())
    }

    /// Number of credentials (active or not).
    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of credentials eligible for selection.
    pub fn active_len(&self) -> usize {
        self.state().active_order.len()
    }
}

/// A claimed credential awaiting its outcome.
///
/// Holds no lock; the outbound call runs while the guard is alive.
#[must_use = "report the outcome with succeed() or fail()"]
#[derive(Debug)]
pub struct Claim<'a> {
    pool: &'a CredentialPool,
    id: String,
    previous: Option<Instant>,
    token: u64,
    settled: bool,
}

impl Claim<'_> {
    /// The claimed credential.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Record a success for the claimed credential.
    pub fn succeed(mut self) {
        self.settled = true;
        self.pool.record_success(&self.id);
    }

    /// Record a failure for the claimed credential.
    pub fn fail(mut self) {
        self.settled = true;
        self.pool.record_failure(&self.id);
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.pool
                .release_unsettled(&self.id, self.previous, self.token);
        }
    }
}
