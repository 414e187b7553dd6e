//! Background lease renewal.
//!
//! One task per [`crate::LockHandle`]. The task renews on a fixed cadence and
//! stops for good on the first of: explicit stop, the store reporting another
//! owner, or enough consecutive transient failures that the lease has
//! certainly expired store side.

use crate::client::extend_lease;
use crate::config::LockConfig;
use crate::error::LockError;
use crate::handle::LossNotifier;
use crate::models::{LockToken, LossReason};
use crate::storage::LeaseStore;
use log::{debug, error, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Running,
    Stopped,
}

/// Renewal cadence and failure budget for one lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewPolicy {
    pub interval: Duration,
    pub max_failures: u32,
}

impl RenewPolicy {
    /// A third of the lease by default, so two renewals fit before expiry
    /// even if one is late. A configured cadence is capped at that third,
    /// since it was validated against the default lease, not this one. The
    /// failure budget defaults to the smallest count of missed ticks that
    /// spans more than one lease.
    pub fn for_lease(lease: Duration, config: &LockConfig) -> Self {
        let interval = config
            .renew_interval
            .map_or(lease / 3, |configured| configured.min(lease / 3))
            .max(Duration::from_millis(1));
        let max_failures = config.max_renew_failures.unwrap_or_else(|| {
            let ticks = lease.as_millis() / interval.as_millis();
            u32::try_from(ticks + 1).unwrap_or(u32::MAX)
        });
        Self {
            interval,
            max_failures: max_failures.max(1),
        }
    }
}

pub struct LeaseWatchdog {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LeaseWatchdog {
    pub(crate) fn spawn(
        store: Arc<dyn LeaseStore>,
        token: Arc<LockToken>,
        policy: RenewPolicy,
        loss: LossNotifier,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(renew_loop(store, token, policy, loss, cancel.clone()));
        Self {
            cancel,
            task: Some(task),
        }
    }

    pub fn state(&self) -> WatchdogState {
        match &self.task {
            Some(task) if !self.cancel.is_cancelled() && !task.is_finished() => {
                WatchdogState::Running
            }
            _ => WatchdogState::Stopped,
        }
    }

    /// Cancel renewal and wait until the task has exited. No loss is reported.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("[RENEW] Watchdog task failed: {}", e);
            }
        }
    }
}

impl Drop for LeaseWatchdog {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn renew_loop(
    store: Arc<dyn LeaseStore>,
    token: Arc<LockToken>,
    policy: RenewPolicy,
    loss: LossNotifier,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + policy.interval, policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if loss.is_lost() {
            break;
        }

        // a hung store call counts as a miss, not as a stall of the cadence
        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = tokio::time::timeout(
                policy.interval,
                extend_lease(store.as_ref(), &token, token.lease_duration()),
            ) => result,
        };

        let failure = match attempt {
            Ok(Ok(())) => {
                if failures > 0 {
                    debug!(
                        "[RENEW] Recovered after {} failed renewals - key: {}",
                        failures,
                        token.key()
                    );
                }
                failures = 0;
                continue;
            }
            Ok(Err(LockError::LockLost { .. })) => {
                warn!(
                    "[LOST] Lease superseded - key: {}, owner_id: {}",
                    token.key(),
                    token.owner_id()
                );
                loss.mark(LossReason::Superseded);
                break;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("renewal timed out after {:?}", policy.interval),
        };

        failures += 1;
        warn!(
            "[RENEW] Renewal failed ({}/{}) - key: {}: {}",
            failures,
            policy.max_failures,
            token.key(),
            failure
        );
        if failures >= policy.max_failures {
            warn!(
                "[LOST] Giving up on lease - key: {}, owner_id: {}",
                token.key(),
                token.owner_id()
            );
            loss.mark(LossReason::RenewalFailed {
                consecutive_failures: failures,
            });
            break;
        }
    }

    debug!("[RENEW] Watchdog stopped - key: {}", token.key());
}
