//! ============================================================================
//! Holdings Cache - Short-TTL wallet holdings with serve-stale fallback
//! ============================================================================
//! Entries live in the shared key-value store under `tokens:<wallet>` for the
//! stale TTL. Whether an entry is still fresh is decided from its own
//! `fetched_at`, so an entry past its freshness window stays available as a
//! fallback when the oracle is throttled or failing.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::limiter::{Permit, RateLimiter};
use crate::config::CacheLimits;
use crate::kv::KvStore;
use crate::oracle::BalanceOracle;
use crate::types::{GateError, WalletHolding};

/// Key prefix for cached holdings
pub const HOLDINGS_KEY_PREFIX: &str = "tokens:";

/// How current a holdings snapshot is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Fetched from the oracle for this call
    Fresh,
    /// Served from cache within the TTL
    Cached,
    /// Served from cache past the TTL because a fetch was unavailable
    Stale,
}

/// A wallet's holdings as seen at `fetched_at` (unix millis)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingsSnapshot {
    pub holdings: Vec<WalletHolding>,
    pub fetched_at: i64,
    pub freshness: Freshness,
}

impl HoldingsSnapshot {
    /// Balance of `token_address`, `"0"` when the wallet holds none
    pub fn balance_of(&self, token_address: &str) -> String {
        self.holdings
            .iter()
            .find(|h| h.matches(token_address))
            .map(|h| h.balance.clone())
            .unwrap_or_else(|| "0".to_string())
    }

    pub fn is_stale(&self) -> bool {
        self.freshness == Freshness::Stale
    }
}

/// Stored form of a cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    holdings: Vec<WalletHolding>,
    fetched_at: i64,
}

impl CacheEntry {
    fn age_secs(&self, now: i64) -> i64 {
        (now - self.fetched_at).max(0) / 1000
    }

    fn is_fresh(&self, now: i64, ttl_secs: u64) -> bool {
        self.age_secs(now) < ttl_secs as i64
    }

    /// Freshness of an entry served in place of a fetch
    fn fallback(self, now: i64, ttl_secs: u64) -> HoldingsSnapshot {
        let freshness = if self.is_fresh(now, ttl_secs) {
            Freshness::Cached
        } else {
            Freshness::Stale
        };
        self.into_snapshot(freshness)
    }

    fn into_snapshot(self, freshness: Freshness) -> HoldingsSnapshot {
        HoldingsSnapshot {
            holdings: self.holdings,
            fetched_at: self.fetched_at,
            freshness,
        }
    }
}

/// Rate-limited, cached view over a balance oracle
pub struct HoldingsCache {
    oracle: Arc<dyn BalanceOracle>,
    kv: Arc<dyn KvStore>,
    limiter: RateLimiter,
    limits: CacheLimits,
}

impl HoldingsCache {
    pub fn new(oracle: Arc<dyn BalanceOracle>, kv: Arc<dyn KvStore>, limits: CacheLimits) -> Self {
        Self {
            limiter: RateLimiter::new(kv.clone(), limits.max_requests, limits.window_secs),
            oracle,
            kv,
            limits,
        }
    }

    pub fn key(wallet: &str) -> String {
        format!("{}{}", HOLDINGS_KEY_PREFIX, wallet)
    }

    /// Holdings for `wallet`, from cache when fresh, otherwise from the
    /// oracle within the wallet's rate-limit budget.
    ///
    /// `force_refresh` skips the fresh-cache shortcut but still spends
    /// budget; when the budget is gone the cached entry is served instead.
    ///
    /// # Errors
    ///
    /// - `RateLimited` when the budget is exhausted and nothing is cached
    /// - `OracleUnavailable` / `MalformedResponse` when the oracle fails and
    ///   nothing is cached
    /// - `Cache` when the key-value store itself fails
    pub async fn get_holdings(
        &self,
        wallet: &str,
        force_refresh: bool,
    ) -> Result<HoldingsSnapshot, GateError> {
        let now = chrono::Utc::now().timestamp_millis();
        let cached = self.read_entry(wallet).await?;

        if !force_refresh {
            if let Some(entry) = &cached {
                if entry.is_fresh(now, self.limits.ttl_secs) {
                    debug!(
                        "Cache hit for wallet {} (age: {}s)",
                        wallet,
                        entry.age_secs(now)
                    );
                    return Ok(entry.clone().into_snapshot(Freshness::Cached));
                }
            }
        }

        if let Permit::Limited { retry_after_secs } = self.limiter.acquire(wallet).await? {
            return match cached {
                Some(entry) => {
                    info!(
                        "Rate limited for {}, serving holdings {}s old",
                        wallet,
                        entry.age_secs(now)
                    );
                    Ok(entry.fallback(now, self.limits.ttl_secs))
                }
                None => Err(GateError::RateLimited { retry_after_secs }),
            };
        }

        debug!("Cache miss for wallet {}, fetching from oracle", wallet);
        match self.oracle.fetch_holdings(wallet).await {
            Ok(holdings) => Ok(self.store(wallet, holdings).await),
            Err(e) if e.is_dependency_failure() => match cached {
                Some(entry) => {
                    warn!("Oracle failed for {} ({}), serving cached holdings", wallet, e);
                    Ok(entry.fallback(now, self.limits.ttl_secs))
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Fetch from the oracle without spending rate-limit budget.
    ///
    /// Reserved for operator-triggered refreshes; request-serving paths go
    /// through [`HoldingsCache::get_holdings`].
    pub async fn refresh_unthrottled(&self, wallet: &str) -> Result<HoldingsSnapshot, GateError> {
        info!("Unthrottled holdings refresh for {}", wallet);
        let holdings = self.oracle.fetch_holdings(wallet).await?;
        Ok(self.store(wallet, holdings).await)
    }

    /// Drop a wallet's cached holdings (e.g. after a known transfer)
    pub async fn invalidate(&self, wallet: &str) -> Result<bool, GateError> {
        let removed = self
            .kv
            .delete(&Self::key(wallet))
            .await
            .map_err(|e| GateError::Cache(e.to_string()))?;
        if removed {
            info!("Invalidated cached holdings for {}", wallet);
        }
        Ok(removed)
    }

    async fn read_entry(&self, wallet: &str) -> Result<Option<CacheEntry>, GateError> {
        let bytes = self
            .kv
            .get(&Self::key(wallet))
            .await
            .map_err(|e| GateError::Cache(e.to_string()))?;

        Ok(bytes.and_then(|b| match serde_json::from_slice::<CacheEntry>(&b) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Ignoring unreadable holdings entry for {}: {}", wallet, e);
                None
            }
        }))
    }

    /// Persist a fresh fetch. A failed write still returns the fetched data.
    async fn store(&self, wallet: &str, holdings: Vec<WalletHolding>) -> HoldingsSnapshot {
        let entry = CacheEntry {
            holdings,
            fetched_at: chrono::Utc::now().timestamp_millis(),
        };

        match serde_json::to_vec(&entry) {
            Ok(bytes) => {
                if let Err(e) = self
                    .kv
                    .set_ex(&Self::key(wallet), bytes, self.limits.stale_ttl_secs)
                    .await
                {
                    warn!("Failed to cache holdings for {}: {}", wallet, e);
                }
            }
            Err(e) => warn!("Failed to encode holdings for {}: {}", wallet, e),
        }

        entry.into_snapshot(Freshness::Fresh)
    }
}
