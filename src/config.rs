use crate::error::{LockError, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;

pub const DEFAULT_CLIENT_NAME: &str = "fe-lease-lock";

/// Client-side locking knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// Bounds how long a crashed holder can block others.
    pub lease_duration: Duration,
    /// How long `acquire` contends for a busy lock.
    pub acquire_timeout: Duration,
    pub retry_interval: Duration,
    /// Upper bound of the random delay added to each retry sleep.
    pub retry_jitter: Duration,
    /// Renewal cadence; `None` means a third of the lease.
    pub renew_interval: Option<Duration>,
    /// Consecutive transient renewal failures tolerated; `None` derives it from the lease.
    pub max_renew_failures: Option<u32>,
    pub auto_renew: bool,
    pub client_name: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(10),
            retry_interval: Duration::from_millis(100),
            retry_jitter: Duration::from_millis(50),
            renew_interval: None,
            max_renew_failures: None,
            auto_renew: true,
            client_name: DEFAULT_CLIENT_NAME.to_string(),
        }
    }
}

impl LockConfig {
    /// Read `LOCK_*` variables; unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            lease_duration: env_millis("LOCK_LEASE_DURATION_MS").unwrap_or(defaults.lease_duration),
            acquire_timeout: env_millis("LOCK_ACQUIRE_TIMEOUT_MS")
                .unwrap_or(defaults.acquire_timeout),
            retry_interval: env_millis("LOCK_RETRY_INTERVAL_MS").unwrap_or(defaults.retry_interval),
            retry_jitter: env_millis("LOCK_RETRY_JITTER_MS").unwrap_or(defaults.retry_jitter),
            renew_interval: env_millis("LOCK_RENEW_INTERVAL_MS"),
            max_renew_failures: env::var("LOCK_MAX_RENEW_FAILURES")
                .ok()
                .and_then(|s| s.parse::<u32>().ok()),
            auto_renew: env::var("LOCK_AUTO_RENEW")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.auto_renew),
            client_name: env::var("LOCK_CLIENT_NAME").unwrap_or(defaults.client_name),
        }
    }

    /// Fails with `InvalidConfig` on values no lease could honor.
    pub fn validate(&self) -> Result<()> {
        check_lease(self.lease_duration)?;
        if self.retry_interval.is_zero() {
            return Err(LockError::InvalidConfig(
                "retry interval must be greater than zero".to_string(),
            ));
        }
        if matches!(self.renew_interval, Some(d) if d.is_zero() || d >= self.lease_duration) {
            return Err(LockError::InvalidConfig(
                "renew interval must be non-zero and shorter than the lease".to_string(),
            ));
        }
        if self.max_renew_failures == Some(0) {
            return Err(LockError::InvalidConfig(
                "max renew failures must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn check_lease(lease: Duration) -> Result<()> {
    if lease.as_millis() == 0 {
        return Err(LockError::InvalidConfig(
            "lease duration must be at least 1ms".to_string(),
        ));
    }
    Ok(())
}

/// Which lease store backend `storage::connect` builds.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub storage_type: StorageType,
    pub redis_url: Option<String>,
    pub redis_username: Option<String>,
    pub redis_password: Option<String>,
    pub redis_db: Option<i64>,
    pub redis_key_prefix: String,
    pub memory_persist_enabled: bool,
    pub memory_persist_path: String,
    pub memory_persist_interval: u64, // seconds
    pub memory_sweep_interval: u64,   // seconds
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Memory,
    Redis,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Memory,
            redis_url: None,
            redis_username: None,
            redis_password: None,
            redis_db: None,
            redis_key_prefix: "lock:".to_string(),
            memory_persist_enabled: false,
            memory_persist_path: "./data/leases.json".to_string(),
            memory_persist_interval: 30,
            memory_sweep_interval: 60,
        }
    }
}

impl StoreConfig {
    /// Read `STORAGE_TYPE`, `REDIS_*` and `MEMORY_*` variables.
    pub fn from_env() -> Self {
        let storage_type = env::var("STORAGE_TYPE")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase();

        let storage_type = match storage_type.as_str() {
            "redis" => StorageType::Redis,
            _ => StorageType::Memory,
        };

        let redis_url = if storage_type == StorageType::Redis {
            Some(env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()))
        } else {
            None
        };

        let redis_db = env::var("REDIS_DB")
            .ok()
            .and_then(|s| s.parse::<i64>().ok());

        let memory_persist_enabled = env::var("MEMORY_PERSIST_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let defaults = Self::default();

        Self {
            storage_type,
            redis_url,
            redis_username: env::var("REDIS_USERNAME").ok(),
            redis_password: env::var("REDIS_PASSWORD").ok(),
            redis_db,
            redis_key_prefix: env::var("REDIS_KEY_PREFIX").unwrap_or(defaults.redis_key_prefix),
            memory_persist_enabled,
            memory_persist_path: env::var("MEMORY_PERSIST_PATH")
                .unwrap_or(defaults.memory_persist_path),
            memory_persist_interval: env::var("MEMORY_PERSIST_INTERVAL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.memory_persist_interval),
            memory_sweep_interval: env::var("MEMORY_SWEEP_INTERVAL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.memory_sweep_interval),
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}
