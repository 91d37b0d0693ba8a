//! ============================================================================
//! Access Module - Token-holding checks for gated links
//! ============================================================================
//! Answers "does this wallet hold at least N of this token?" while keeping
//! oracle traffic bounded.
//!
//! ## Layers
//! - **RateLimiter**: fixed-window oracle budget per wallet
//! - **HoldingsCache**: short-TTL holdings with serve-stale fallback
//! - **AccessEngine**: exact decimal comparison against a threshold
//!
//! ## Usage
//! ```rust,ignore
//! use linkgate_core::access::{AccessEngine, HoldingsCache};
//!
//! let cache = Arc::new(HoldingsCache::new(oracle, kv, config.limits));
//! let engine = AccessEngine::new(cache);
//! let decision = engine.evaluate(&wallet, &token, "50", false).await?;
//! ```
//! ============================================================================

mod cache;
mod engine;
mod limiter;

pub use cache::{Freshness, HoldingsCache, HoldingsSnapshot, HOLDINGS_KEY_PREFIX};
pub use engine::{AccessDecision, AccessEngine};
pub use limiter::{Permit, RateLimiter, RATE_LIMIT_KEY_PREFIX};
