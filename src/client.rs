use crate::config::{check_lease, LockConfig};
use crate::error::{LockError, Result};
use crate::handle::{LockHandle, LossNotifier};
use crate::models::{new_owner_id, LockToken};
use crate::storage::LeaseStore;
use crate::watchdog::{LeaseWatchdog, RenewPolicy};
use log::{debug, info, warn};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(1);
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Acquires, extends and releases leases against a [`LeaseStore`].
#[derive(Clone)]
pub struct LockClient {
    store: Arc<dyn LeaseStore>,
    config: LockConfig,
}

impl LockClient {
    pub fn new(store: Arc<dyn LeaseStore>, config: LockConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn LeaseStore> {
        &self.store
    }

    /// [`acquire_with`](Self::acquire_with) using the configured lease,
    /// timeout and retry interval.
    pub async fn acquire(&self, key: &str) -> Result<LockHandle> {
        self.acquire_with(
            key,
            self.config.lease_duration,
            self.config.acquire_timeout,
            self.config.retry_interval,
        )
        .await
    }

    /// Contend for `key` until `acquire_timeout` elapses.
    ///
    /// Each attempt is raced against the deadline. If the deadline fires while
    /// a write is still in flight, the write may still land; nobody holds a
    /// handle for it and it expires after `lease_duration`.
    pub async fn acquire_with(
        &self,
        key: &str,
        lease_duration: Duration,
        acquire_timeout: Duration,
        retry_interval: Duration,
    ) -> Result<LockHandle> {
        check_lease(lease_duration)?;
        let owner_id = new_owner_id(&self.config.client_name);
        let started = Instant::now();
        let deadline = started
            .checked_add(acquire_timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let mut unavailable: Option<anyhow::Error> = None;
        let mut attempts: u32 = 0;
        let mut completed: u32 = 0;

        info!(
            "[ACQUIRE] Attempting to acquire lock - key: {}, owner_id: {}, lease: {:?}, timeout: {:?}",
            key, owner_id, lease_duration, acquire_timeout
        );

        loop {
            attempts += 1;
            let attempt = tokio::time::timeout_at(
                deadline,
                self.store.set_if_absent(key, &owner_id, lease_duration),
            )
            .await;

            match attempt {
                Ok(Ok(true)) => {
                    info!(
                        "[ACQUIRE SUCCESS] Lock acquired - key: {}, owner_id: {}, attempts: {}",
                        key, owner_id, attempts
                    );
                    return Ok(self.activate(key, owner_id, lease_duration));
                }
                Ok(Ok(false)) => {
                    completed += 1;
                    unavailable = None;
                    debug!("[ACQUIRE] Lock held by another owner - key: {}", key);
                }
                Ok(Err(e)) => {
                    completed += 1;
                    debug!("[ACQUIRE] Lease store error - key: {}: {:#}", key, e);
                    unavailable = Some(e);
                }
                Err(_) => {
                    warn!(
                        "[ACQUIRE] Deadline reached with a store call in flight - key: {}, owner_id: {}",
                        key, owner_id
                    );
                    // the last answered attempt decides; a store that never
                    // answered at all is unreachable
                    if completed == 0 {
                        unavailable = Some(anyhow::anyhow!(
                            "lease store did not answer before the acquire deadline"
                        ));
                    }
                    break;
                }
            }

            // never start an attempt at or past the deadline
            let pause = retry_interval.max(MIN_RETRY_INTERVAL) + self.jitter();
            if Instant::now() + pause >= deadline {
                break;
            }
            tokio::time::sleep(pause).await;
        }

        let waited = started.elapsed();
        match unavailable {
            Some(source) => Err(LockError::unavailable(key, source)),
            None => {
                info!(
                    "[ACQUIRE FAILED] Lock still held at deadline - key: {}, attempts: {}, waited: {:?}",
                    key, attempts, waited
                );
                Err(LockError::AcquireTimeout {
                    key: key.to_string(),
                    waited,
                })
            }
        }
    }

    /// One attempt with the configured lease; `Ok(None)` if the lock is held.
    pub async fn try_acquire(&self, key: &str) -> Result<Option<LockHandle>> {
        let lease_duration = self.config.lease_duration;
        let owner_id = new_owner_id(&self.config.client_name);

        match self
            .store
            .set_if_absent(key, &owner_id, lease_duration)
            .await
        {
            Ok(true) => {
                info!(
                    "[ACQUIRE SUCCESS] Lock acquired - key: {}, owner_id: {}",
                    key, owner_id
                );
                Ok(Some(self.activate(key, owner_id, lease_duration)))
            }
            Ok(false) => Ok(None),
            Err(e) => Err(LockError::unavailable(key, e)),
        }
    }

    pub async fn extend(&self, handle: &LockHandle, lease_duration: Duration) -> Result<()> {
        handle.extend(lease_duration).await
    }

    pub async fn release(&self, handle: LockHandle) -> Result<()> {
        handle.release().await
    }

    fn activate(&self, key: &str, owner_id: String, lease_duration: Duration) -> LockHandle {
        let token = Arc::new(LockToken::new(key.to_string(), owner_id, lease_duration));
        let loss = LossNotifier::new();
        let watchdog = self.config.auto_renew.then(|| {
            LeaseWatchdog::spawn(
                Arc::clone(&self.store),
                Arc::clone(&token),
                RenewPolicy::for_lease(lease_duration, &self.config),
                loss.clone(),
            )
        });
        LockHandle::new(Arc::clone(&self.store), token, watchdog, loss)
    }

    fn jitter(&self) -> Duration {
        let max = u64::try_from(self.config.retry_jitter.as_millis()).unwrap_or(u64::MAX);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max))
    }
}

/// Compare-and-extend as one store call, mapped onto the lock error taxonomy.
pub(crate) async fn extend_lease(
    store: &dyn LeaseStore,
    token: &LockToken,
    lease_duration: Duration,
) -> Result<()> {
    check_lease(lease_duration)?;
    match store
        .compare_and_extend(token.key(), token.owner_id(), lease_duration)
        .await
    {
        Ok(true) => {
            debug!(
                "[RENEW] Lease extended - key: {}, lease: {:?}",
                token.key(),
                lease_duration
            );
            Ok(())
        }
        Ok(false) => Err(LockError::lost(token.key())),
        Err(e) => Err(LockError::unavailable(token.key(), e)),
    }
}
