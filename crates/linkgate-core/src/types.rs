//! ============================================================================
//! Core Types for Linkgate
//! ============================================================================
//! Page and link records, wallet holdings, and the error taxonomy shared by
//! the cipher, oracle, cache and resolver.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel token address used for the chain's native coin (SOL)
pub const NATIVE_TOKEN: &str = "native";

/// A Solana wallet address that decodes to a 32-byte public key.
///
/// The wallet-login provider hands the resolver one of these once it has
/// verified the visitor's signature; this type only checks the encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn parse(s: &str) -> Result<Self, GateError> {
        let trimmed = s.trim();
        let bytes = bs58::decode(trimmed)
            .into_vec()
            .map_err(|e| GateError::InvalidWallet(format!("{}: {}", trimmed, e)))?;

        if bytes.len() != 32 {
            return Err(GateError::InvalidWallet(format!(
                "{}: expected 32 bytes, got {}",
                trimmed,
                bytes.len()
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = GateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

/// A link-in-bio page. Every gated link on it is evaluated against
/// `connected_token`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub slug: String,
    /// Wallet that owns the page (base58)
    pub owner_wallet: String,
    /// Mint address of the page's connected token, if any
    pub connected_token: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Page {
    pub fn is_owned_by(&self, wallet: &WalletAddress) -> bool {
        self.owner_wallet == wallet.as_str()
    }

    /// Connected token, treating a blank string as unset
    pub fn connected_token(&self) -> Option<&str> {
        self.connected_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// A link as stored: `url` is ciphertext when `token_gated`, plaintext otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    /// Semantic type of the link (icon/validation only)
    pub preset_id: String,
    pub url: Option<String>,
    pub token_gated: bool,
    /// Decimal-string thresholds. Only the first entry is consulted.
    pub required_tokens: Vec<String>,
    /// Display order within the page
    pub position: u32,
}

impl Link {
    /// The threshold access checks use: `required_tokens[0]`, blank treated as unset
    pub fn required_amount(&self) -> Option<&str> {
        self.required_tokens
            .first()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

/// One wallet's balance of one asset, as a non-negative decimal string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletHolding {
    pub token_address: String,
    pub balance: String,
}

impl WalletHolding {
    pub fn new(token_address: impl Into<String>, balance: impl Into<String>) -> Self {
        Self {
            token_address: token_address.into(),
            balance: balance.into(),
        }
    }

    pub fn matches(&self, token_address: &str) -> bool {
        self.token_address.eq_ignore_ascii_case(token_address.trim())
    }
}

/// Error types for gated link resolution
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GateError {
    #[error("Malformed encrypted record")]
    MalformedRecord,

    #[error("Failed to decrypt record")]
    DecryptionFailure,

    #[error("Balance oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("Malformed oracle response: {0}")]
    MalformedResponse(String),

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Wallet connection required")]
    Unauthenticated,

    #[error("Invalid wallet address: {0}")]
    InvalidWallet(String),

    #[error("Invalid token amount: {0}")]
    InvalidAmount(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache store error: {0}")]
    Cache(String),

    #[error("Link store error: {0}")]
    Store(String),
}

impl GateError {
    /// Failures of the third-party oracle, which a stale cache entry may absorb
    pub fn is_dependency_failure(&self) -> bool {
        matches!(
            self,
            GateError::OracleUnavailable(_) | GateError::MalformedResponse(_)
        )
    }

    /// Seconds the caller should wait before retrying, when known
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            GateError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}
