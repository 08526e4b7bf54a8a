//! Conversion between decimal prices and the contract's fixed-point rates.
//!
//! The rate contract stores every rate as a `uint256` scaled by 10^18, so a
//! rate of OMG/ETH 0.016883 is stored as 16,883,000,000,000,000. Both the
//! getter and setter paths go through this module so the scale never drifts.
//!
//! Observed prices are `rust_decimal::Decimal` values; rounding them to the
//! 18th fractional digit is half-to-even. Stored rates decode into [`Rate`],
//! an exact 18-decimal fixed-point value over the full `uint256` range.

use alloy::primitives::U256;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Number of fractional digits encoded in an on-chain rate.
pub const RATE_DECIMALS: u32 = 18;

/// The on-chain scale factor, 10^18.
pub const RATE_SCALE: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("price {0} is negative and cannot be encoded as a rate")]
    NegativePrice(Decimal),

    #[error("on-chain rate {0} exceeds the representable decimal range")]
    RateOutOfRange(U256),
}

/// A decimal rate with exactly 18 fractional digits, as stored on-chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rate(U256);

impl Rate {
    pub const ZERO: Rate = Rate(U256::ZERO);

    /// The raw contract value, `rate * 10^18`.
    pub fn chain_units(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// The rate as a `Decimal`, when its mantissa fits in 96 bits.
    pub fn to_decimal(&self) -> Result<Decimal, ConversionError> {
        let mantissa = u128::try_from(self.0)
            .ok()
            .and_then(|m| i128::try_from(m).ok())
            .ok_or(ConversionError::RateOutOfRange(self.0))?;
        let price = Decimal::try_from_i128_with_scale(mantissa, RATE_DECIMALS)
            .map_err(|_| ConversionError::RateOutOfRange(self.0))?;

        Ok(price.normalize())
    }
}

impl std::fmt::Display for Rate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", format_fixed(&self.0.to_string()))
    }
}

/// Anything that can be encoded as contract rate units.
pub trait IntoChainUnits {
    fn into_chain_units(self) -> Result<U256, ConversionError>;
}

impl IntoChainUnits for Decimal {
    fn into_chain_units(self) -> Result<U256, ConversionError> {
        if self.is_sign_negative() && !self.is_zero() {
            return Err(ConversionError::NegativePrice(self));
        }

        let rounded = self.round_dp_with_strategy(RATE_DECIMALS, RoundingStrategy::MidpointNearestEven);
        // `rounded` has at most RATE_DECIMALS fractional digits, so shifting the
        // mantissa left by the remaining digits is exact.
        let mantissa = U256::from(rounded.mantissa().unsigned_abs());
        let shift = RATE_DECIMALS - rounded.scale();

        Ok(mantissa * U256::from(10u64).pow(U256::from(shift)))
    }
}

impl IntoChainUnits for Rate {
    fn into_chain_units(self) -> Result<U256, ConversionError> {
        Ok(self.0)
    }
}

/// Encode a price as a contract rate: `round(price * 10^18)`.
pub fn to_chain_units(price: impl IntoChainUnits) -> Result<U256, ConversionError> {
    price.into_chain_units()
}

/// Decode a contract rate: `raw / 10^18`. Exact for every `uint256`.
pub fn from_chain_units(raw: U256) -> Rate {
    Rate(raw)
}

/// Render an integer count of 10^-18 units as a decimal string.
pub(crate) fn format_fixed(digits: &str) -> String {
    let decimals = RATE_DECIMALS as usize;
    let padded = format!("{digits:0>width$}", width = decimals + 1);
    let (int, frac) = padded.split_at(padded.len() - decimals);
    let frac = frac.trim_end_matches('0');

    if frac.is_empty() {
        int.to_string()
    } else {
        format!("{int}.{frac}")
    }
}
