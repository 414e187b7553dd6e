use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Generate a fresh owner id: `{client_name}:{pid}:{uuid-v4}`.
///
/// The random component makes ids unique per acquisition attempt, even for
/// the same process and key.
pub fn new_owner_id(client_name: &str) -> String {
    format!("{}:{}:{}", client_name, std::process::id(), Uuid::new_v4())
}

/// Identity of one successful acquisition.
///
/// `owner_id` is the only thing that proves ownership; `acquired_at` is local
/// bookkeeping and never consulted for correctness.
#[derive(Debug, Clone)]
pub struct LockToken {
    key: String,
    owner_id: String,
    lease_duration: Duration,
    acquired_at: Instant,
}

impl LockToken {
    pub(crate) fn new(key: String, owner_id: String, lease_duration: Duration) -> Self {
        Self {
            key,
            owner_id,
            lease_duration,
            acquired_at: Instant::now(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    pub fn lease_duration_millis(&self) -> u64 {
        u64::try_from(self.lease_duration.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// Local time since acquisition. Informational only.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

/// Why a watchdog gave up on a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossReason {
    /// The store reported a different owner (or no key) on renewal.
    Superseded,
    /// Renewal kept failing transiently for longer than one lease duration.
    RenewalFailed { consecutive_failures: u32 },
}
