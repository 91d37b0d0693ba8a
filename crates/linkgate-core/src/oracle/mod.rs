//! ============================================================================
//! Oracle Module - Wallet balances from an external indexing RPC
//! ============================================================================
//! The oracle answers one question: which fungible assets (plus native SOL)
//! does a wallet hold? It performs no retries; the holdings cache decides
//! what to do with a failure because it knows about staleness and budget.
//! ============================================================================

mod helius;

pub use helius::{HeliusOracle, MAX_ASSET_PAGES, PAGE_LIMIT};

use async_trait::async_trait;

use crate::types::{GateError, WalletHolding};

/// Source of wallet holdings.
#[async_trait]
pub trait BalanceOracle: Send + Sync {
    /// Every non-zero fungible balance of `wallet`, with the native balance
    /// first under the `"native"` address (included even when zero).
    ///
    /// # Errors
    ///
    /// - `OracleUnavailable` on network failure, timeout or non-success status
    /// - `MalformedResponse` when the expected result shape is absent
    async fn fetch_holdings(&self, wallet: &str) -> Result<Vec<WalletHolding>, GateError>;
}
