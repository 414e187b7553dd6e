use crate::storage::LeaseStore;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Lease {
    owner_id: String,
    expires_at: Instant,
}

impl Lease {
    fn new(owner_id: &str, ttl: Duration) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn is_held_by(&self, owner_id: &str, now: Instant) -> bool {
        !self.is_expired(now) && self.owner_id == owner_id
    }
}

/// On-disk form of a lease. Monotonic instants do not survive a restart, so
/// the remaining TTL is stored together with the wall-clock snapshot time.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedLease {
    key: String,
    owner_id: String,
    remaining_ms: u64,
    persisted_at: DateTime<Utc>,
}

/// In-process lease store.
///
/// Each operation holds the DashMap shard lock for its key for the whole
/// compare-and-act, which makes it atomic. Expired entries are treated as
/// absent on every access and physically removed by the sweeper.
pub struct MemoryLeaseStore {
    leases: DashMap<String, Lease>, // key -> lease
    persist_path: Option<PathBuf>,
}

impl Default for MemoryLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLeaseStore {
    /// Empty store without persistence.
    pub fn new() -> Self {
        Self {
            leases: DashMap::new(),
            persist_path: None,
        }
    }

    /// Empty store that snapshots to `persist_path`. Call
    /// [`load_from_disk`](Self::load_from_disk) to restore a previous snapshot.
    pub fn with_persistence(persist_path: PathBuf) -> Self {
        Self {
            leases: DashMap::new(),
            persist_path: Some(persist_path),
        }
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.leases.len();
        self.leases.retain(|key, lease| {
            let expired = lease.is_expired(now);
            if expired {
                log::info!(
                    "[EXPIRED CLEANUP] Removed expired lease - key: {}, owner_id: {}",
                    key,
                    lease.owner_id
                );
            }
            !expired
        });
        before.saturating_sub(self.leases.len())
    }

    /// Purge expired entries every `period`.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let purged = store.purge_expired();
                if purged > 0 {
                    log::info!("[CLEANUP] Purged {} expired leases", purged);
                }
            }
        })
    }

    /// Write a snapshot every `period`. Failures are logged and retried on the next tick.
    pub fn spawn_persister(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = store.persist_to_disk().await {
                    log::error!("[PERSISTENCE] Failed to persist to disk: {:#}", e);
                }
            }
        })
    }

    /// Load leases saved by [`persist_to_disk`](Self::persist_to_disk),
    /// skipping any whose TTL ran out while the process was down.
    pub async fn load_from_disk(&self) -> Result<usize> {
        let path = match &self.persist_path {
            Some(p) => p,
            None => return Ok(0),
        };

        if !path.exists() {
            log::info!("[PERSISTENCE] No persistence file found at {:?}", path);
            return Ok(0);
        }

        let mut file = fs::File::open(path).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;

        let data: Vec<PersistedLease> = serde_json::from_str(&contents)?;
        let now = Utc::now();
        let mut loaded_count = 0;

        for record in data {
            let downtime_ms = now
                .signed_duration_since(record.persisted_at)
                .num_milliseconds()
                .max(0) as u64;
            let remaining_ms = record.remaining_ms.saturating_sub(downtime_ms);
            if remaining_ms == 0 {
                continue;
            }
            let lease = Lease::new(&record.owner_id, Duration::from_millis(remaining_ms));
            // never clobber a lease granted since startup
            if let Entry::Vacant(slot) = self.leases.entry(record.key) {
                slot.insert(lease);
                loaded_count += 1;
            }
        }

        log::info!(
            "[PERSISTENCE] Loaded {} leases from disk (file: {:?})",
            loaded_count,
            path
        );
        Ok(loaded_count)
    }

    /// Save live leases to disk through a temp file and rename. Returns how many
    /// were written; a no-op without a persistence path.
    pub async fn persist_to_disk(&self) -> Result<usize> {
        let path = match &self.persist_path {
            Some(p) => p,
            None => return Ok(0),
        };

        let now = Instant::now();
        let persisted_at = Utc::now();
        let leases: Vec<PersistedLease> = self
            .leases
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| PersistedLease {
                key: entry.key().clone(),
                owner_id: entry.value().owner_id.clone(),
                remaining_ms: u64::try_from(entry.value().expires_at.duration_since(now).as_millis())
                    .unwrap_or(u64::MAX),
                persisted_at,
            })
            .collect();

        let count = leases.len();
        let json = serde_json::to_string_pretty(&leases)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // write-then-rename so readers never see a torn file
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(temp_path, path).await?;

        log::debug!(
            "[PERSISTENCE] Persisted {} leases to disk (file: {:?})",
            count,
            path
        );
        Ok(count)
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    /// An expired entry counts as absent and is overwritten in place.
    async fn set_if_absent(&self, key: &str, owner_id: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.leases.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_expired(now) {
                    return Ok(false);
                }
                log::info!(
                    "[EXPIRED] Lease expired and replaced - key: {}, old owner_id: {}",
                    key,
                    entry.get().owner_id
                );
                entry.insert(Lease::new(owner_id, ttl));
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert(Lease::new(owner_id, ttl));
                Ok(true)
            }
        }
    }

    async fn compare_and_delete(&self, key: &str, owner_id: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .leases
            .remove_if(key, |_, lease| lease.is_held_by(owner_id, now))
            .is_some())
    }

    /// The new expiry is `now + ttl`, not the old expiry plus `ttl`.
    async fn compare_and_extend(&self, key: &str, owner_id: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.leases.get_mut(key) {
            Some(mut lease) if lease.is_held_by(owner_id, now) => {
                lease.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn current_owner(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        Ok(self
            .leases
            .get(key)
            .filter(|lease| !lease.is_expired(now))
            .map(|lease| lease.owner_id.clone()))
    }
}
