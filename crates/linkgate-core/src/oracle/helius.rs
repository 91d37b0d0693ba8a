//! ============================================================================
//! Helius Oracle - Holdings via the Helius DAS JSON-RPC API
//! ============================================================================
//! Two queries per wallet, issued concurrently:
//! - `getAssetsByOwner` (paginated, fungible display enabled)
//! - `getBalance` (native lamports)
//! ============================================================================

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::BalanceOracle;
use crate::amount::{scale_raw_amount, to_balance_string, NATIVE_DECIMALS};
use crate::config::GateConfig;
use crate::types::{GateError, WalletHolding, NATIVE_TOKEN};

/// Assets requested per `getAssetsByOwner` page
pub const PAGE_LIMIT: u32 = 1000;

/// Upper bound on pages followed for a single wallet
pub const MAX_ASSET_PAGES: u32 = 10;

/// JSON-RPC request id
const REQUEST_ID: &str = "linkgate";

/// Asset interfaces that carry a fungible balance
const FUNGIBLE_INTERFACES: [&str; 2] = ["FungibleToken", "FungibleAsset"];

/// Balance oracle backed by a Helius RPC endpoint
pub struct HeliusOracle {
    client: Client,
    endpoint: Url,
    page_limit: u32,
}

impl HeliusOracle {
    /// Create from gate configuration
    pub fn new(config: &GateConfig) -> Result<Self, GateError> {
        Self::with_endpoint(
            &config.oracle_url,
            config.oracle_api_key.as_deref(),
            Duration::from_secs(config.oracle_timeout_secs),
        )
    }

    /// Create with an explicit endpoint; the API key goes in the `api-key`
    /// query parameter
    pub fn with_endpoint(
        base_url: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, GateError> {
        let mut endpoint = Url::parse(base_url)
            .map_err(|e| GateError::Config(format!("Invalid oracle URL '{}': {}", base_url, e)))?;
        if let Some(key) = api_key {
            endpoint.query_pairs_mut().append_pair("api-key", key);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GateError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            page_limit: PAGE_LIMIT,
        })
    }

    /// Override the page size (mostly useful against small test fixtures)
    pub fn with_page_limit(mut self, page_limit: u32) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    async fn call<P, T>(&self, method: &str, params: P) -> Result<T, GateError>
    where
        P: Serialize + Send,
        T: DeserializeOwned,
    {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: REQUEST_ID,
            method,
            params,
        };

        debug!(
            "Oracle call {} -> {}",
            method,
            self.endpoint.host_str().unwrap_or("?")
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| GateError::OracleUnavailable(format!("{} request failed: {}", method, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GateError::OracleUnavailable(format!(
                "{} returned {}: {}",
                method,
                status,
                truncate(&body, 200)
            )));
        }

        let envelope: RpcResponse = response.json().await.map_err(|e| {
            GateError::MalformedResponse(format!("{} body is not JSON-RPC: {}", method, e))
        })?;

        if let Some(error) = envelope.error {
            return Err(GateError::OracleUnavailable(format!(
                "{} error {}: {}",
                method, error.code, error.message
            )));
        }

        let result = envelope
            .result
            .ok_or_else(|| GateError::MalformedResponse(format!("{} has no result", method)))?;

        serde_json::from_value(result)
            .map_err(|e| GateError::MalformedResponse(format!("{} result shape: {}", method, e)))
    }

    async fn fetch_native(&self, wallet: &str) -> Result<WalletHolding, GateError> {
        let balance: BalanceResult = self.call("getBalance", [wallet]).await?;
        let sol = scale_raw_amount(balance.value, NATIVE_DECIMALS)?;
        Ok(WalletHolding::new(NATIVE_TOKEN, to_balance_string(sol)))
    }

    async fn fetch_fungible(&self, wallet: &str) -> Result<Vec<WalletHolding>, GateError> {
        let mut holdings = Vec::new();

        for page in 1..=MAX_ASSET_PAGES {
            let params = AssetsByOwnerParams {
                owner_address: wallet,
                page,
                limit: self.page_limit,
                display_options: DisplayOptions {
                    show_fungible: true,
                },
            };
            let result: AssetPage = self.call("getAssetsByOwner", params).await?;
            let fetched = result.items.len();

            holdings.extend(result.items.into_iter().filter_map(fungible_holding));

            if fetched < self.page_limit as usize {
                break;
            }
            if page == MAX_ASSET_PAGES {
                warn!(
                    "Wallet {} has more than {} asset pages, remaining assets ignored",
                    wallet, MAX_ASSET_PAGES
                );
            }
        }

        Ok(holdings)
    }
}

#[async_trait]
impl BalanceOracle for HeliusOracle {
    async fn fetch_holdings(&self, wallet: &str) -> Result<Vec<WalletHolding>, GateError> {
        let (native, fungible) =
            tokio::try_join!(self.fetch_native(wallet), self.fetch_fungible(wallet))?;

        let mut holdings = Vec::with_capacity(fungible.len() + 1);
        holdings.push(native);
        holdings.extend(fungible);

        debug!("Oracle returned {} holdings for {}", holdings.len(), wallet);
        Ok(holdings)
    }
}

/// Keep fungible assets with a positive balance, scaled by their decimals
fn fungible_holding(asset: Asset) -> Option<WalletHolding> {
    let interface = asset.interface.as_deref().unwrap_or_default();
    if !FUNGIBLE_INTERFACES.contains(&interface) {
        return None;
    }

    let info = asset.token_info?;
    let raw = info.balance.filter(|b| *b > 0)?;
    match scale_raw_amount(raw, info.decimals.unwrap_or(0)) {
        Ok(amount) => Some(WalletHolding::new(asset.id, to_balance_string(amount))),
        Err(e) => {
            warn!("Skipping asset {}: {}", asset.id, e);
            None
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ============================================================================
// Helius API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<serde_json::Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssetsByOwnerParams<'a> {
    owner_address: &'a str,
    page: u32,
    limit: u32,
    display_options: DisplayOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DisplayOptions {
    show_fungible: bool,
}

#[derive(Debug, Deserialize)]
struct AssetPage {
    items: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    id: String,
    interface: Option<String>,
    token_info: Option<TokenInfo>,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    balance: Option<u64>,
    decimals: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct BalanceResult {
    value: u64,
}
