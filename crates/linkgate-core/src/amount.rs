//! ============================================================================
//! Token Amounts - Exact decimal parsing, scaling and comparison
//! ============================================================================
//! Balances and thresholds are decimal strings. They are compared as
//! `rust_decimal::Decimal` (96-bit mantissa), never as f64: thresholds such
//! as 1_000_000_000_001 sit outside the range where f64 is exact.
//! ============================================================================

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::types::GateError;

/// Lamports per SOL exponent
pub const NATIVE_DECIMALS: u32 = 9;

/// Parse a non-negative decimal amount such as `"50"` or `"0.25"`.
pub fn parse_amount(s: &str) -> Result<Decimal, GateError> {
    let trimmed = s.trim();
    let amount = Decimal::from_str(trimmed)
        .map_err(|e| GateError::InvalidAmount(format!("'{}': {}", trimmed, e)))?;
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(GateError::InvalidAmount(format!("'{}' is negative", trimmed)));
    }
    Ok(amount)
}

/// Whether `balance` is at least `required`
pub fn meets_threshold(balance: &str, required: &str) -> Result<bool, GateError> {
    Ok(parse_amount(balance)? >= parse_amount(required)?)
}

/// Convert a raw on-chain integer amount into token units: `raw / 10^decimals`
pub fn scale_raw_amount(raw: u64, decimals: u32) -> Result<Decimal, GateError> {
    Decimal::try_from_i128_with_scale(i128::from(raw), decimals)
        .map_err(|e| GateError::InvalidAmount(format!("{} with {} decimals: {}", raw, decimals, e)))
}

/// Canonical string form: no trailing zeros, no exponent
pub fn to_balance_string(amount: Decimal) -> String {
    amount.normalize().to_string()
}

/// Format an amount with K/M/B suffixes for user-facing messages
pub fn format_balance(amount: Decimal) -> String {
    let thousand = Decimal::from(1_000u64);
    let million = Decimal::from(1_000_000u64);
    let billion = Decimal::from(1_000_000_000u64);

    if amount >= billion {
        format!("{:.2}B", amount / billion)
    } else if amount >= million {
        format!("{:.2}M", amount / million)
    } else if amount >= thousand {
        format!("{:.2}K", amount / thousand)
    } else {
        format!("{:.2}", amount)
    }
}
