//! ============================================================================
//! Rate Limiter - Fixed-window oracle budget per wallet
//! ============================================================================
//! One counter per wallet under `ratelimit:tokens:<wallet>`. The counter's
//! expiry is set when the window opens and never extended, so a wallet gets
//! `max_requests` oracle calls per window regardless of traffic shape.
//! ============================================================================

use std::sync::Arc;
use tracing::debug;

use crate::kv::KvStore;
use crate::types::GateError;

/// Key prefix for per-wallet oracle counters
pub const RATE_LIMIT_KEY_PREFIX: &str = "ratelimit:tokens:";

/// Outcome of acquiring one unit of oracle budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    Allowed { used: u64 },
    Limited { retry_after_secs: u64 },
}

pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    max_requests: u64,
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, max_requests: u64, window_secs: u64) -> Self {
        Self {
            kv,
            max_requests,
            window_secs,
        }
    }

    pub fn key(wallet: &str) -> String {
        format!("{}{}", RATE_LIMIT_KEY_PREFIX, wallet)
    }

    /// Count one request against the wallet's window.
    ///
    /// The increment happens before the ceiling check, so a burst of
    /// concurrent callers can never all observe room below the ceiling.
    pub async fn acquire(&self, wallet: &str) -> Result<Permit, GateError> {
        let key = Self::key(wallet);
        let used = self
            .kv
            .incr_ex(&key, self.window_secs)
            .await
            .map_err(|e| GateError::Cache(e.to_string()))?;

        if used <= self.max_requests {
            debug!("Oracle budget for {}: {}/{}", wallet, used, self.max_requests);
            return Ok(Permit::Allowed { used });
        }

        let retry_after_secs = self
            .kv
            .ttl(&key)
            .await
            .map_err(|e| GateError::Cache(e.to_string()))?
            .filter(|secs| *secs > 0)
            .unwrap_or(self.window_secs);

        debug!(
            "Oracle budget exhausted for {} ({} > {}), retry in {}s",
            wallet, used, self.max_requests, retry_after_secs
        );
        Ok(Permit::Limited { retry_after_secs })
    }

    /// Clear the wallet's counter
    pub async fn reset(&self, wallet: &str) -> Result<(), GateError> {
        self.kv
            .delete(&Self::key(wallet))
            .await
            .map_err(|e| GateError::Cache(e.to_string()))?;
        Ok(())
    }
}
