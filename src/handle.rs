use crate::client::extend_lease;
use crate::error::{LockError, Result};
use crate::models::{LockToken, LossReason};
use crate::storage::LeaseStore;
use crate::watchdog::{LeaseWatchdog, WatchdogState};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Write side of a handle's loss signal. Shared by the handle and its watchdog.
#[derive(Clone)]
pub(crate) struct LossNotifier {
    tx: Arc<watch::Sender<Option<LossReason>>>,
}

impl LossNotifier {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Record the loss. Only the first call has any effect; returns whether
    /// this call was it.
    pub(crate) fn mark(&self, reason: LossReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn is_lost(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub(crate) fn subscribe(&self) -> LostSignal {
        LostSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Fires at most once, when a held lease is lost involuntarily.
///
/// An explicit release never fires it; once the handle is released and
/// dropped, [`lost`](Self::lost) resolves to `None`.
#[derive(Debug, Clone)]
pub struct LostSignal {
    rx: watch::Receiver<Option<LossReason>>,
}

impl LostSignal {
    pub fn is_lost(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<LossReason> {
        *self.rx.borrow()
    }

    /// Wait for the loss. Meant to be raced against the critical section
    /// with `tokio::select!`.
    pub async fn lost(&mut self) -> Option<LossReason> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(reason) => *reason,
            Err(_) => None,
        }
    }
}

/// Ownership of one acquired lock.
///
/// Owned by the caller that acquired it. Dropping it without calling
/// [`release`](Self::release) stops renewal and leaves the lease to expire
/// on its own.
pub struct LockHandle {
    store: Arc<dyn LeaseStore>,
    token: Arc<LockToken>,
    watchdog: Option<LeaseWatchdog>,
    loss: LossNotifier,
}

impl LockHandle {
    pub(crate) fn new(
        store: Arc<dyn LeaseStore>,
        token: Arc<LockToken>,
        watchdog: Option<LeaseWatchdog>,
        loss: LossNotifier,
    ) -> Self {
        Self {
            store,
            token,
            watchdog,
            loss,
        }
    }

    pub fn key(&self) -> &str {
        self.token.key()
    }

    pub fn owner_id(&self) -> &str {
        self.token.owner_id()
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Whether the lease is known to be lost. `false` does not prove the
    /// lease is still held; only the store can say that.
    pub fn is_lost(&self) -> bool {
        self.loss.is_lost()
    }

    pub fn lost_signal(&self) -> LostSignal {
        self.loss.subscribe()
    }

    /// Run `callback` once if the lease is lost. Never runs after a clean release.
    pub fn on_lost<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(LossReason) + Send + 'static,
    {
        let mut signal = self.lost_signal();
        tokio::spawn(async move {
            if let Some(reason) = signal.lost().await {
                callback(reason);
            }
        })
    }

    pub fn watchdog_state(&self) -> WatchdogState {
        self.watchdog
            .as_ref()
            .map_or(WatchdogState::Stopped, LeaseWatchdog::state)
    }

    /// Reset the lease TTL to `lease`, if this handle still owns it.
    pub async fn extend(&self, lease: Duration) -> Result<()> {
        if self.loss.is_lost() {
            return Err(LockError::lost(self.key()));
        }
        let result = extend_lease(self.store.as_ref(), &self.token, lease).await;
        if matches!(result, Err(LockError::LockLost { .. })) && self.loss.mark(LossReason::Superseded) {
            warn!(
                "[LOST] Lease superseded on extend - key: {}, owner_id: {}",
                self.key(),
                self.owner_id()
            );
        }
        result
    }

    /// Stop renewal, then delete the lease if this handle still owns it.
    ///
    /// Returns [`LockError::LockLost`] when the lease had already expired or
    /// moved to another owner; the other owner's key is left untouched.
    pub async fn release(mut self) -> Result<()> {
        if let Some(mut watchdog) = self.watchdog.take() {
            watchdog.stop().await;
        }

        let key = self.token.key();
        let owner_id = self.token.owner_id();

        if self.loss.is_lost() {
            debug!(
                "[RELEASE] Lock already lost, nothing to release - key: {}, owner_id: {}",
                key, owner_id
            );
            return Err(LockError::lost(key));
        }

        info!(
            "[RELEASE] Releasing lock - key: {}, owner_id: {}, held_for: {:?}",
            key,
            owner_id,
            self.token.held_for()
        );

        match self.store.compare_and_delete(key, owner_id).await {
            Ok(true) => {
                info!("[RELEASE SUCCESS] Lock released - key: {}", key);
                Ok(())
            }
            Ok(false) => {
                self.loss.mark(LossReason::Superseded);
                warn!(
                    "[RELEASE FAILED] Lease expired or owned by someone else - key: {}, owner_id: {}",
                    key, owner_id
                );
                Err(LockError::lost(key))
            }
            Err(e) => Err(LockError::unavailable(key, e)),
        }
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("token", &self.token)
            .field("watchdog", &self.watchdog_state())
            .field("lost", &self.is_lost())
            .finish()
    }
}
