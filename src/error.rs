use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LockError>;

/// Failures surfaced to callers of [`crate::LockClient`] and [`crate::LockHandle`].
///
/// None of these are logged and dropped internally: the caller is the only
/// party that knows whether in-flight work has to be aborted.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock stayed contended until the caller's deadline.
    #[error("timed out after {waited:?} waiting for lock `{key}`")]
    AcquireTimeout { key: String, waited: Duration },

    /// The lease store could not be reached (or failed) and the retry budget ran out.
    #[error("lease store unavailable while operating on `{key}`")]
    StoreUnavailable {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// The lease expired or now belongs to another owner. The critical
    /// section may no longer have been exclusive.
    #[error("lock `{key}` lost: lease expired or is held by another owner")]
    LockLost { key: String },

    #[error("invalid lock configuration: {0}")]
    InvalidConfig(String),
}

impl LockError {
    pub(crate) fn unavailable(key: &str, source: anyhow::Error) -> Self {
        LockError::StoreUnavailable {
            key: key.to_string(),
            source,
        }
    }

    pub(crate) fn lost(key: &str) -> Self {
        LockError::LockLost {
            key: key.to_string(),
        }
    }

    pub fn is_lock_lost(&self) -> bool {
        matches!(self, LockError::LockLost { .. })
    }

    /// Whether retrying with a fresh deadline can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LockError::AcquireTimeout { .. } | LockError::StoreUnavailable { .. }
        )
    }
}
