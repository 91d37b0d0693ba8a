//! ============================================================================
//! Gate Configuration
//! ============================================================================
//! Server secret, oracle endpoint and cache/rate-limit tuning, read from the
//! environment. A missing secret is a startup error, never a runtime one.
//! ============================================================================

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::types::GateError;

/// Default PBKDF2 iteration count for URL key derivation
pub const DEFAULT_CIPHER_ITERATIONS: u32 = 10_000;

/// Default Helius RPC endpoint
pub const DEFAULT_ORACLE_URL: &str = "https://mainnet.helius-rpc.com";

/// Default oracle request timeout in seconds
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 5;

/// Default freshness window for cached holdings
pub const DEFAULT_HOLDINGS_TTL_SECS: u64 = 30;

/// Default lifetime of an expired entry that may still be served stale
pub const DEFAULT_HOLDINGS_STALE_TTL_SECS: u64 = 600;

/// Default oracle requests allowed per wallet per window
pub const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u64 = 3;

/// Default rate-limit window in seconds
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Server-held key derivation secret. Redacted from Debug, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Holdings cache and rate limiter tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub ttl_secs: u64,
    pub stale_ttl_secs: u64,
    pub max_requests: u64,
    pub window_secs: u64,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_HOLDINGS_TTL_SECS,
            stale_ttl_secs: DEFAULT_HOLDINGS_STALE_TTL_SECS,
            max_requests: DEFAULT_RATE_LIMIT_MAX_REQUESTS,
            window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
        }
    }
}

/// Full gate configuration
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub encryption_secret: Secret,
    pub cipher_iterations: u32,
    pub oracle_url: String,
    pub oracle_api_key: Option<String>,
    pub oracle_timeout_secs: u64,
    pub limits: CacheLimits,
}

impl GateConfig {
    /// Config with the given secret and every other value at its default
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            encryption_secret: Secret::new(secret),
            cipher_iterations: DEFAULT_CIPHER_ITERATIONS,
            oracle_url: DEFAULT_ORACLE_URL.to_string(),
            oracle_api_key: None,
            oracle_timeout_secs: DEFAULT_ORACLE_TIMEOUT_SECS,
            limits: CacheLimits::default(),
        }
    }

    /// Load from process environment variables
    pub fn from_env() -> Result<Self, GateError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GateError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = lookup("LINK_ENCRYPTION_SECRET")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| GateError::Config("LINK_ENCRYPTION_SECRET is not set".into()))?;

        let mut config = Self::with_secret(secret);

        if let Some(v) = lookup("LINK_CIPHER_ITERATIONS") {
            config.cipher_iterations = parse_number("LINK_CIPHER_ITERATIONS", &v)?;
        }
        if let Some(v) = lookup("HELIUS_RPC_URL").filter(|v| !v.trim().is_empty()) {
            config.oracle_url = v.trim().to_string();
        }
        config.oracle_api_key = lookup("HELIUS_API_KEY").filter(|v| !v.trim().is_empty());
        if let Some(v) = lookup("ORACLE_TIMEOUT_SECS") {
            config.oracle_timeout_secs = parse_number("ORACLE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("HOLDINGS_TTL_SECS") {
            config.limits.ttl_secs = parse_number("HOLDINGS_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("HOLDINGS_STALE_TTL_SECS") {
            config.limits.stale_ttl_secs = parse_number("HOLDINGS_STALE_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("RATE_LIMIT_MAX_REQUESTS") {
            config.limits.max_requests = parse_number("RATE_LIMIT_MAX_REQUESTS", &v)?;
        }
        if let Some(v) = lookup("RATE_LIMIT_WINDOW_SECS") {
            config.limits.window_secs = parse_number("RATE_LIMIT_WINDOW_SECS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the cache and cipher cannot run with
    pub fn validate(&self) -> Result<(), GateError> {
        if self.encryption_secret.expose().is_empty() {
            return Err(GateError::Config("encryption secret is empty".into()));
        }
        if self.cipher_iterations == 0 {
            return Err(GateError::Config("cipher iterations must be > 0".into()));
        }
        if self.oracle_timeout_secs == 0 {
            return Err(GateError::Config("oracle timeout must be > 0".into()));
        }
        let limits = &self.limits;
        if limits.ttl_secs == 0 || limits.window_secs == 0 || limits.max_requests == 0 {
            return Err(GateError::Config(
                "holdings TTL, rate-limit window and request ceiling must be > 0".into(),
            ));
        }
        if limits.stale_ttl_secs < limits.ttl_secs {
            return Err(GateError::Config(format!(
                "stale TTL ({}s) must not be shorter than TTL ({}s)",
                limits.stale_ttl_secs, limits.ttl_secs
            )));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, GateError> {
    value
        .trim()
        .parse()
        .map_err(|_| GateError::Config(format!("{} must be a number, got '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_secret_is_config_error() {
        let result = GateConfig::from_lookup(lookup_from(&[]));
        assert!(matches!(result, Err(GateError::Config(_))));

        let result = GateConfig::from_lookup(lookup_from(&[("LINK_ENCRYPTION_SECRET", "  ")]));
        assert!(matches!(result, Err(GateError::Config(_))));
    }

    #[test]
    fn test_defaults() {
        let config =
            GateConfig::from_lookup(lookup_from(&[("LINK_ENCRYPTION_SECRET", "s3cret")])).unwrap();
        assert_eq!(config.cipher_iterations, DEFAULT_CIPHER_ITERATIONS);
        assert_eq!(config.oracle_url, DEFAULT_ORACLE_URL);
        assert_eq!(config.oracle_api_key, None);
        assert_eq!(config.limits, CacheLimits::default());
    }

    #[test]
    fn test_overrides() {
        let config = GateConfig::from_lookup(lookup_from(&[
            ("LINK_ENCRYPTION_SECRET", "s3cret"),
            ("HELIUS_API_KEY", "key-1"),
            ("HOLDINGS_TTL_SECS", "10"),
            ("RATE_LIMIT_MAX_REQUESTS", "5"),
            ("RATE_LIMIT_WINDOW_SECS", "30"),
        ]))
        .unwrap();
        assert_eq!(config.oracle_api_key.as_deref(), Some("key-1"));
        assert_eq!(config.limits.ttl_secs, 10);
        assert_eq!(config.limits.max_requests, 5);
        assert_eq!(config.limits.window_secs, 30);
    }

    #[test]
    fn test_rejects_bad_numbers_and_limits() {
        let bad_number = GateConfig::from_lookup(lookup_from(&[
            ("LINK_ENCRYPTION_SECRET", "s3cret"),
            ("HOLDINGS_TTL_SECS", "soon"),
        ]));
        assert!(matches!(bad_number, Err(GateError::Config(_))));

        let stale_shorter = GateConfig::from_lookup(lookup_from(&[
            ("LINK_ENCRYPTION_SECRET", "s3cret"),
            ("HOLDINGS_TTL_SECS", "60"),
            ("HOLDINGS_STALE_TTL_SECS", "30"),
        ]));
        assert!(matches!(stale_shorter, Err(GateError::Config(_))));
    }

    #[test]
    fn test_secret_is_redacted() {
        let config = GateConfig::with_secret("hunter2");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
