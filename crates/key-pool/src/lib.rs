//! Credential pool and request router
//!
//! Spreads generation requests across a pool of interchangeable API keys.
//! The pool tracks per-key usage and failure streaks and always hands out the
//! key with the lowest priority score; the router retries across keys until a
//! call succeeds or the attempt budget is spent.
//!
//! Credential lifecycle:
//! 1. A source (file or HTTP) lists the current keys → `reload` merges them
//!    into the pool, keeping stats of keys that stay
//! 2. `claim()` picks the lowest-scoring active key and stamps it
//! 3. Success → usage +1, failure streak cleared
//! 4. Failure → streak +1, key penalised for `60s × streak` (Cooling)
//! 5. Window expires or the key succeeds → Eligible again
//! 6. A key missing from the next reload is dropped with its stats

pub mod error;
pub mod pool;
pub mod record;
pub mod reload;
pub mod router;
pub mod source;
pub mod stats;

pub use error::{Error, Result};
pub use pool::{Claim, CredentialPool};
pub use record::{COOLDOWN_PER_ERROR, CredentialRecord, PENALTY_PER_ERROR};
pub use reload::{reload, spawn_reload_task};
pub use router::{RequestRouter, RouterConfig};
pub use source::{FileKeySource, HttpKeySource, KeySource};
pub use stats::{CredentialStats, PoolStats, PoolStatus};
