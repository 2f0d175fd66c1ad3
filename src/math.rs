//! Ledger arithmetic.
//!
//! All share and allocation math goes through these helpers so that
//! overflow is always an error, never a wrap or a panic. Products that
//! exceed 128 bits are promoted through `BigUint` before division.

use num_bigint::BigUint;

use crate::types::{Amount, VaultError};

/// Basis-point denominator: 10000 bps = 100%.
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Scale of the fixed-point rate reported by venues (1e27).
pub const RATE_SCALE: u128 = 1_000_000_000_000_000_000_000_000_000;

/// Divisor converting a 1e27-scaled rate to annualized basis points:
/// a rate of 5e25 maps to 500 bps.
pub const RATE_TO_BPS_DIVISOR: u128 = RATE_SCALE / BPS_DENOMINATOR as u128;

/// Compute `a * b / denom` with full-width intermediate precision.
pub fn mul_div(a: Amount, b: Amount, denom: Amount) -> Result<Amount, VaultError> {
    if denom == 0 {
        return Err(VaultError::ArithmeticOverflow);
    }
    if let Some(product) = a.checked_mul(b) {
        return Ok(product / denom);
    }
    let product = BigUint::from(a) * BigUint::from(b) / BigUint::from(denom);
    Amount::try_from(product).map_err(|_| VaultError::ArithmeticOverflow)
}

/// The given fraction of `amount`, expressed in basis points.
pub fn bps_of(amount: Amount, bps: u32) -> Result<Amount, VaultError> {
    mul_div(amount, bps as Amount, BPS_DENOMINATOR as Amount)
}

/// Convert a 1e27-scaled venue rate to annualized basis points.
///
/// Venue-reported rates are untrusted data: a rate whose bps value does
/// not fit in 64 bits is rejected rather than truncated.
pub fn rate_to_apy_bps(rate: u128) -> Result<u64, VaultError> {
    u64::try_from(rate / RATE_TO_BPS_DIVISOR).map_err(|_| VaultError::ArithmeticOverflow)
}

/// Inverse of [`rate_to_apy_bps`] — used by venue fixtures and tests.
pub fn apy_bps_to_rate(bps: u64) -> u128 {
    bps as u128 * RATE_TO_BPS_DIVISOR
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_div_basic() {
        assert_eq!(mul_div(100, 50, 200).unwrap(), 25);
        assert_eq!(mul_div(0, 1000, 7).unwrap(), 0);
        assert_eq!(mul_div(7, 3, 2).unwrap(), 10); // truncates
    }

    #[test]
    fn test_mul_div_zero_denominator() {
        assert!(matches!(
            mul_div(1, 1, 0),
            Err(VaultError::ArithmeticOverflow)
        ));
    }

    #[test]
    fn test_mul_div_wide_intermediate() {
        // a * b overflows u128 but the quotient fits.
        let a = 10u128.pow(30);
        let b = 10u128.pow(20);
        let denom = 10u128.pow(20);
        assert_eq!(mul_div(a, b, denom).unwrap(), a);
    }

    #[test]
    fn test_mul_div_result_overflow_rejected() {
        let result = mul_div(Amount::MAX, 2, 1);
        assert!(matches!(result, Err(VaultError::ArithmeticOverflow)));
    }

    #[test]
    fn test_bps_of() {
        assert_eq!(bps_of(10_000, 1000).unwrap(), 1_000); // 10%
        assert_eq!(bps_of(10_000, 9000).unwrap(), 9_000); // 90%
        assert_eq!(bps_of(10_000, 10_000).unwrap(), 10_000); // 100%
        assert_eq!(bps_of(3, 5000).unwrap(), 1); // truncates
    }

    #[test]
    fn test_rate_to_apy_bps_observed_samples() {
        // 5e25 on the 1e27 scale is a 5% APY.
        assert_eq!(rate_to_apy_bps(5 * 10u128.pow(25)).unwrap(), 500);
        assert_eq!(rate_to_apy_bps(6 * 10u128.pow(25)).unwrap(), 600);
        // 5.1e25 → 510 bps
        assert_eq!(rate_to_apy_bps(51 * 10u128.pow(24)).unwrap(), 510);
    }

    #[test]
    fn test_rate_to_apy_bps_garbage_rate_rejected() {
        assert!(rate_to_apy_bps(u128::MAX).is_err());
    }

    #[test]
    fn test_rate_roundtrip() {
        assert_eq!(rate_to_apy_bps(apy_bps_to_rate(500)).unwrap(), 500);
        assert_eq!(rate_to_apy_bps(apy_bps_to_rate(0)).unwrap(), 0);
    }
}
