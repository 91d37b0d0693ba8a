// ============================================================================
// RedbKv - Persistent key-value store (redb)
// ============================================================================
// Backs the holdings cache and rate-limit counters with an embedded database
// so they survive restarts. redb holds an exclusive lock on the file, so one
// process owns the store at a time.
// Default path: ~/.linkgate/cache.redb (override via LINKGATE_CACHE_PATH)
// ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{decode_counter, expiry_after, now_millis, remaining_secs, KvStore};

const KV: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

/// Value plus expiry, bincode-encoded into the table
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredValue {
    value: Vec<u8>,
    expires_at: i64,
}

impl StoredValue {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at > now
    }
}

/// Embedded expiring key-value store
pub struct RedbKv {
    db: Database,
    path: PathBuf,
}

impl RedbKv {
    /// Open (or create) the store at the given path.
    /// If `path` is None, uses LINKGATE_CACHE_PATH or ~/.linkgate/cache.redb
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let kv_path = match path {
            Some(p) => p.to_path_buf(),
            None => match std::env::var("LINKGATE_CACHE_PATH") {
                Ok(env_path) => PathBuf::from(env_path),
                Err(_) => crate::db::default_data_dir()?.join("cache.redb"),
            },
        };

        info!("Opening cache store at: {}", kv_path.display());

        let db = Database::create(&kv_path)
            .map_err(|e| anyhow!("Failed to open cache store: {}", e))?;

        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(KV)
                .map_err(|e| anyhow!("Failed to create kv table: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        Ok(Self { db, path: kv_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_stored(&self, key: &str) -> Result<Option<StoredValue>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(KV)
            .map_err(|e| anyhow!("Failed to open kv table: {}", e))?;

        match table
            .get(key)
            .map_err(|e| anyhow!("Failed to get key {}: {}", key, e))?
        {
            Some(value) => {
                let stored: StoredValue = bincode::deserialize(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize value for {}: {}", key, e))?;
                Ok(Some(stored))
            }
            None => Ok(None),
        }
    }

    /// Remove every expired key. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = now_millis();
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let removed;
        {
            let mut table = write_txn
                .open_table(KV)
                .map_err(|e| anyhow!("Failed to open kv table: {}", e))?;

            let mut expired = Vec::new();
            let iter = table
                .range::<&str>(..)
                .map_err(|e| anyhow!("Failed to iterate kv: {}", e))?;
            for entry in iter {
                let (key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
                let live = bincode::deserialize::<StoredValue>(value.value())
                    .map(|s| s.is_live(now))
                    .unwrap_or(false);
                if !live {
                    expired.push(key.value().to_string());
                }
            }

            for key in &expired {
                table
                    .remove(key.as_str())
                    .map_err(|e| anyhow!("Failed to remove key {}: {}", key, e))?;
            }
            removed = expired.len();
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit purge: {}", e))?;

        if removed > 0 {
            info!("Purged {} expired cache keys", removed);
        }
        Ok(removed)
    }

    /// Count of (live, total) keys
    pub fn stats(&self) -> Result<(usize, usize)> {
        let now = now_millis();
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(KV)
            .map_err(|e| anyhow!("Failed to open kv table: {}", e))?;

        let mut live = 0;
        let mut total = 0;
        let iter = table
            .range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate kv: {}", e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            total += 1;
            if bincode::deserialize::<StoredValue>(value.value())
                .map(|s| s.is_live(now))
                .unwrap_or(false)
            {
                live += 1;
            }
        }
        Ok((live, total))
    }
}

#[async_trait]
impl KvStore for RedbKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = now_millis();
        Ok(self
            .read_stored(key)?
            .filter(|s| s.is_live(now))
            .map(|s| s.value))
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<()> {
        let stored = StoredValue {
            value,
            expires_at: expiry_after(ttl_secs),
        };
        let bytes = bincode::serialize(&stored)
            .map_err(|e| anyhow!("Failed to serialize value: {}", e))?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn
                .open_table(KV)
                .map_err(|e| anyhow!("Failed to open kv table: {}", e))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(|e| anyhow!("Failed to insert key {}: {}", key, e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Stored key {} (ttl {}s)", key, ttl_secs);
        Ok(())
    }

    async fn incr_ex(&self, key: &str, window_secs: u64) -> Result<u64> {
        let now = now_millis();

        // redb serializes write transactions, which makes read-modify-write atomic
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let count;
        {
            let mut table = write_txn
                .open_table(KV)
                .map_err(|e| anyhow!("Failed to open kv table: {}", e))?;

            let existing = table
                .get(key)
                .map_err(|e| anyhow!("Failed to get key {}: {}", key, e))?
                .and_then(|v| bincode::deserialize::<StoredValue>(v.value()).ok())
                .filter(|s| s.is_live(now));

            let stored = match existing {
                Some(s) => StoredValue {
                    value: (decode_counter(&s.value).saturating_add(1))
                        .to_be_bytes()
                        .to_vec(),
                    expires_at: s.expires_at,
                },
                None => StoredValue {
                    value: 1u64.to_be_bytes().to_vec(),
                    expires_at: expiry_after(window_secs),
                },
            };
            count = decode_counter(&stored.value);

            let bytes = bincode::serialize(&stored)
                .map_err(|e| anyhow!("Failed to serialize counter: {}", e))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(|e| anyhow!("Failed to insert counter {}: {}", key, e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit: {}", e))?;

        Ok(count)
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        let now = now_millis();
        Ok(self
            .read_stored(key)?
            .filter(|s| s.is_live(now))
            .map(|s| remaining_secs(s.expires_at, now)))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = now_millis();
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let removed;
        {
            let mut table = write_txn
                .open_table(KV)
                .map_err(|e| anyhow!("Failed to open kv table: {}", e))?;
            removed = table
                .remove(key)
                .map_err(|e| anyhow!("Failed to remove key {}: {}", key, e))?
                .and_then(|v| bincode::deserialize::<StoredValue>(v.value()).ok())
                .is_some_and(|s| s.is_live(now));
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit delete: {}", e))?;

        Ok(removed)
    }
}
