//! ============================================================================
//! LINKGATE-CORE: Token-gated link resolution
//! ============================================================================
//! This crate handles the request-time side of token-gated links:
//! - URL encryption at rest (PBKDF2 + AES-256-CBC)
//! - Wallet holdings via the Helius DAS API
//! - Holdings cache and per-wallet oracle rate limiting
//! - Access decisions with exact decimal thresholds
//! - The gated link resolver and its visitor session states
//! ============================================================================

pub mod access;
pub mod amount;
pub mod cipher;
pub mod config;
pub mod db;
pub mod gate;
pub mod kv;
pub mod oracle;
pub mod resolver;
pub mod sealing;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use types::*;
pub use access::{AccessDecision, AccessEngine, Freshness, HoldingsCache, HoldingsSnapshot};
pub use cipher::UrlCipher;
pub use config::GateConfig;
pub use db::LinkDb;
pub use gate::LinkGate;
pub use kv::{KvStore, MemoryKv, RedbKv};
pub use oracle::{BalanceOracle, HeliusOracle};
pub use resolver::{GateState, GatedLinkResolver, LinkSession, Resolution};
pub use sealing::{seal_link, LinkDraft};
