//! ============================================================================
//! KV Module - Shared key-value store behind the holdings cache
//! ============================================================================
//! The holdings cache and rate limiter only need get, set-with-expiry,
//! increment-with-expiry, TTL and delete. Atomicity of `incr_ex` is the
//! store's job, so callers hold no locks of their own.
//!
//! ## Bindings
//! - **MemoryKv**: process-local map, bounded, for single-instance deployments
//!   and tests
//! - **RedbKv**: persistent embedded store; redb locks the file, so one
//!   process owns it at a time
//! ============================================================================

mod redb_store;

pub use redb_store::RedbKv;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Maximum number of live keys in a `MemoryKv` before eviction
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Key-value operations used by the holdings cache.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Value for `key`, or None when absent or expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, expiring after `ttl_secs`
    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<()>;

    /// Atomically increment the counter at `key` and return the new count.
    /// The expiry is set only when the counter is created, so a window never
    /// slides forward under steady traffic.
    async fn incr_ex(&self, key: &str, window_secs: u64) -> Result<u64>;

    /// Whole seconds until `key` expires (rounded up), None when absent or
    /// without expiry
    async fn ttl(&self, key: &str) -> Result<Option<u64>>;

    /// Remove `key`, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// Current time in unix milliseconds
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Expiry instant for a TTL starting now
pub(crate) fn expiry_after(ttl_secs: u64) -> i64 {
    let ttl_ms = i64::try_from(ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
    now_millis().saturating_add(ttl_ms)
}

/// Seconds remaining until `expires_at`, rounded up
pub(crate) fn remaining_secs(expires_at: i64, now: i64) -> u64 {
    let remaining_ms = (expires_at - now).max(0) as u64;
    remaining_ms.div_ceil(1000)
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: i64,
    counter: bool,
}

impl MemoryEntry {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at > now
    }
}

/// In-process key-value store with expiry.
///
/// At capacity, plain values are evicted soonest-expiry first. Live
/// counters are never evicted: dropping one would reset a rate-limit window
/// early, so counters may push the map past capacity until they expire.
pub struct MemoryKv {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    max_entries: usize,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let now = now_millis();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Make room for one insert: drop expired entries, then the plain value
    /// closest to expiry
    fn make_room(&self, entries: &mut HashMap<String, MemoryEntry>, now: i64) {
        if entries.len() < self.max_entries {
            return;
        }

        entries.retain(|_, e| e.is_live(now));

        if entries.len() >= self.max_entries {
            match entries
                .iter()
                .filter(|(_, e)| !e.counter)
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone())
            {
                Some(key) => {
                    debug!("Evicting kv entry {} at capacity", key);
                    entries.remove(&key);
                }
                None => debug!("kv at capacity with only live counters"),
            }
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = now_millis();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<()> {
        let now = now_millis();
        let mut entries = self.entries.write().await;
        if !entries.contains_key(key) {
            self.make_room(&mut entries, now);
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: expiry_after(ttl_secs),
                counter: false,
            },
        );
        Ok(())
    }

    async fn incr_ex(&self, key: &str, window_secs: u64) -> Result<u64> {
        let now = now_millis();
        let mut entries = self.entries.write().await;

        let live = entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| (decode_counter(&e.value), e.expires_at));

        let (count, expires_at) = match live {
            Some((count, expires_at)) => (count.saturating_add(1), expires_at),
            None => {
                if !entries.contains_key(key) {
                    self.make_room(&mut entries, now);
                }
                (1, expiry_after(window_secs))
            }
        };

        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: count.to_be_bytes().to_vec(),
                expires_at,
                counter: true,
            },
        );
        Ok(count)
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        let now = now_millis();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| remaining_secs(e.expires_at, now)))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = now_millis();
        let mut entries = self.entries.write().await;
        Ok(entries.remove(key).is_some_and(|e| e.is_live(now)))
    }
}

/// Counters are stored as big-endian u64; anything else restarts at zero
pub(crate) fn decode_counter(bytes: &[u8]) -> u64 {
    <[u8; 8]>::try_from(bytes).map(u64::from_be_bytes).unwrap_or(0)
}
