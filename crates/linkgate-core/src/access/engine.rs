//! ============================================================================
//! Access Engine - Balance-versus-threshold decisions
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::cache::{Freshness, HoldingsCache};
use crate::amount::{format_balance, parse_amount};
use crate::types::GateError;

/// Result of comparing a wallet's balance of one token against a threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub has_access: bool,
    /// Observed balance, `"0"` when the wallet holds none
    pub balance: String,
    pub required: String,
    pub token: String,
    pub freshness: Freshness,
}

impl AccessDecision {
    /// "You have X, need Y" for visitor-facing messages
    pub fn summary(&self) -> String {
        let fmt = |s: &str| {
            parse_amount(s)
                .map(format_balance)
                .unwrap_or_else(|_| s.to_string())
        };
        format!("You have {}, need {}", fmt(&self.balance), fmt(&self.required))
    }
}

pub struct AccessEngine {
    cache: Arc<HoldingsCache>,
}

impl AccessEngine {
    pub fn new(cache: Arc<HoldingsCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<HoldingsCache> {
        &self.cache
    }

    /// Decide whether `wallet` holds at least `required` of `token`.
    ///
    /// A bad threshold fails with `InvalidAmount` before any lookup. Lookup
    /// failures propagate; they are never reported as a denial.
    pub async fn evaluate(
        &self,
        wallet: &str,
        token: &str,
        required: &str,
        force_refresh: bool,
    ) -> Result<AccessDecision, GateError> {
        let required_amount = parse_amount(required)?;

        let snapshot = self.cache.get_holdings(wallet, force_refresh).await?;
        let balance = snapshot.balance_of(token);
        let balance_amount = parse_amount(&balance).map_err(|e| {
            GateError::MalformedResponse(format!("balance of {} for {}: {}", token, wallet, e))
        })?;

        let has_access = balance_amount >= required_amount;
        debug!(
            "Access for {} on {}: have {}, need {} ({:?})",
            wallet, token, balance, required, snapshot.freshness
        );
        if !has_access {
            info!(
                "Access denied for {} on {}: {} < {}",
                wallet, token, balance, required
            );
        }

        Ok(AccessDecision {
            has_access,
            balance,
            required: required.trim().to_string(),
            token: token.to_string(),
            freshness: snapshot.freshness,
        })
    }
}
