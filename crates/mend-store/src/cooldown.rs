//! Cooldown records
//!
//! A cooldown record remembers when an action last ran against a target,
//! keyed `kind:target`. Overlapping recovery runs share the store, so the
//! eligibility check and the write that claims the slot happen as one
//! operation ([`CooldownStore::try_claim`]).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mend_signal::CooldownKey;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::StoreError;

/// Default lifetime of a cooldown record (7 days)
#[inline]
#[must_use]
pub fn default_record_ttl() -> Duration {
    Duration::days(7)
}

/// Result of an atomic check-and-set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Off cooldown; the record now holds the claim time
    Claimed,
    /// Still cooling down
    Active {
        /// Last recorded execution
        last: DateTime<Utc>,
        /// Time left until eligible
        remaining: Duration,
    },
}

impl Claim {
    /// Whether the caller may run the action
    #[inline]
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        matches!(self, Claim::Claimed)
    }
}

/// True when there is no record or the cooldown has fully elapsed
#[inline]
#[must_use]
pub fn is_eligible(last: Option<DateTime<Utc>>, cooldown: Duration, now: DateTime<Utc>) -> bool {
    match last {
        None => true,
        Some(last) => now - last >= cooldown,
    }
}

fn live(last: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    now - last < ttl
}

fn claim_against(
    last: Option<DateTime<Utc>>,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> Claim {
    match last {
        Some(last) if !is_eligible(Some(last), cooldown, now) => Claim::Active {
            last,
            remaining: cooldown - (now - last),
        },
        _ => Claim::Claimed,
    }
}

/// Durable "last execution" store
#[async_trait]
pub trait CooldownStore: Send + Sync {
    /// Last recorded execution for `key` as seen at `now`
    ///
    /// Records older than the store's TTL read as absent, the same way
    /// [`CooldownStore::try_claim`] treats them.
    async fn last_execution(
        &self,
        key: &CooldownKey,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Record an execution. A record never moves backwards in time.
    async fn record_execution(&self, key: &CooldownKey, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Atomically check eligibility and, when eligible, record `now`
    async fn try_claim(
        &self,
        key: &CooldownKey,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Result<Claim, StoreError>;

    /// Read-only eligibility check
    async fn is_eligible(
        &self,
        key: &CooldownKey,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let last = self.last_execution(key, now).await?;
        Ok(is_eligible(last, cooldown, now))
    }
}

/// In-process cooldown store
///
/// Per-key atomicity comes from the `DashMap` entry lock, so concurrent
/// claims on one key serialize while different keys proceed in parallel.
#[derive(Debug)]
pub struct MemoryCooldownStore {
    records: DashMap<CooldownKey, DateTime<Utc>>,
    ttl: Duration,
}

impl MemoryCooldownStore {
    /// Store with the default 7 day record TTL
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(default_record_ttl())
    }

    /// Store with a custom record TTL
    #[inline]
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            ttl,
        }
    }

    /// Drop records older than the TTL, returning how many went
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, last| live(*last, self.ttl, now));
        before - self.records.len()
    }

    /// Number of live records
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for MemoryCooldownStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CooldownStore for MemoryCooldownStore {
    async fn last_execution(
        &self,
        key: &CooldownKey,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .records
            .get(key)
            .map(|entry| *entry.value())
            .filter(|last| live(*last, self.ttl, now)))
    }

    async fn record_execution(&self, key: &CooldownKey, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.records
            .entry(key.clone())
            .and_modify(|last| *last = (*last).max(at))
            .or_insert(at);
        Ok(())
    }

    async fn try_claim(
        &self,
        key: &CooldownKey,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Result<Claim, StoreError> {
        // Must run before the entry lock is taken: retain locks every shard
        let purged = self.purge_expired(now);
        if purged > 0 {
            tracing::debug!(purged, "evicted expired cooldown records");
        }

        let claim = match self.records.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let last = *entry.get();
                let last = live(last, self.ttl, now).then_some(last);
                let claim = claim_against(last, cooldown, now);
                if claim.is_claimed() {
                    entry.insert(now);
                }
                claim
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                Claim::Claimed
            }
        };
        Ok(claim)
    }
}

/// Cooldown store persisted as a JSON object on disk
///
/// Survives process restarts, which matters when every trigger starts a
/// fresh process. Writes go to a sibling temp file and are renamed into
/// place. Claims are serialized through one async mutex.
#[derive(Debug)]
pub struct JsonFileCooldownStore {
    path: PathBuf,
    ttl: Duration,
    records: Mutex<BTreeMap<CooldownKey, DateTime<Utc>>>,
}

impl JsonFileCooldownStore {
    /// Open the store, loading existing records when the file exists
    ///
    /// # Errors
    /// - `StoreError::Io` if the file exists but cannot be read
    /// - `StoreError::Serialization` if its content is not a record map
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_ttl(path, default_record_ttl()).await
    }

    /// Open with a custom record TTL
    ///
    /// # Errors
    /// Same as [`JsonFileCooldownStore::open`]
    pub async fn open_with_ttl(path: impl AsRef<Path>, ttl: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records: BTreeMap<CooldownKey, DateTime<Utc>> = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::io_error(&path, e)),
        };
        tracing::debug!(path = %path.display(), records = records.len(), "opened cooldown store");

        Ok(Self {
            path,
            ttl,
            records: Mutex::new(records),
        })
    }

    /// Path of the backing file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &BTreeMap<CooldownKey, DateTime<Utc>>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StoreError::io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::io_error(&self.path, e))
    }
}

#[async_trait]
impl CooldownStore for JsonFileCooldownStore {
    async fn last_execution(
        &self,
        key: &CooldownKey,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .records
            .lock()
            .await
            .get(key)
            .copied()
            .filter(|last| live(*last, self.ttl, now)))
    }

    async fn record_execution(&self, key: &CooldownKey, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let entry = records.entry(key.clone()).or_insert(at);
        *entry = (*entry).max(at);
        self.persist(&records).await
    }

    async fn try_claim(
        &self,
        key: &CooldownKey,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Result<Claim, StoreError> {
        let mut records = self.records.lock().await;
        records.retain(|_, last| live(*last, self.ttl, now));

        let claim = claim_against(records.get(key).copied(), cooldown, now);
        if claim.is_claimed() {
            records.insert(key.clone(), now);
            self.persist(&records).await?;
        }
        Ok(claim)
    }
}
