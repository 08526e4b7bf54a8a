//! Update decision engine — picks the pairs whose stored rate is stale.
//!
//! A pair is selected when it has a usable observation and either:
//! - the contract has no rate for it yet (stored rate of zero), or
//! - the relative change between the stored and observed price is strictly
//!   greater than the asset's volatility threshold.
//!
//! The comparison runs on integer chain units, `|current - previous| * 10^s`
//! against `mantissa(threshold) * previous` in 512 bits, so it is exact and
//! cannot overflow for any stored `uint256`.

use alloy::primitives::{U256, U512};
use rust_decimal::Decimal;

use sanity_common::types::{Asset, Observation, Pair};

use crate::baseline::Baseline;
use crate::units::{self, RATE_SCALE};

/// One asset selected for an update, with the price to push.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub asset: Asset,
    pub price: Decimal,
}

/// Ordered set of rates to send in one transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateBatch {
    entries: Vec<BatchEntry>,
}

impl UpdateBatch {
    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn push(&mut self, asset: Asset, price: Decimal) {
        self.entries.push(BatchEntry { asset, price });
    }
}

impl std::fmt::Display for UpdateBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|e| format!("{}={}", e.asset.symbol, e.price))
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Select the observations whose stored rate needs refreshing.
pub fn decide(baseline: &Baseline, observations: &[Observation]) -> UpdateBatch {
    let mut batch = UpdateBatch::default();

    for observation in observations {
        let Some(price) = observation.usable_price() else {
            tracing::debug!(pair = %observation.pair, "No usable price, skipping");
            continue;
        };

        let current = match units::to_chain_units(price) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(pair = %observation.pair, price = %price, error = %e, "Price cannot be encoded, skipping");
                continue;
            }
        };

        let previous = baseline
            .get(&observation.pair)
            .copied()
            .unwrap_or(U256::ZERO);

        if should_update(&observation.pair, previous, current) {
            batch.push(observation.pair.asset.clone(), price);
        }
    }

    batch
}

/// Select every usable observation regardless of the stored rate.
pub fn decide_forced(observations: &[Observation]) -> UpdateBatch {
    let mut batch = UpdateBatch::default();

    for observation in observations {
        if let Some(current) = observation.usable_price() {
            batch.push(observation.pair.asset.clone(), current);
        }
    }

    batch
}

fn should_update(pair: &Pair, previous: U256, current: U256) -> bool {
    let threshold = pair.asset.volatility_threshold;

    if previous.is_zero() {
        tracing::debug!(
            pair = %pair,
            current = %units::from_chain_units(current),
            "No previous rate stored, updating to current rate"
        );
        return true;
    }

    let delta = if current > previous {
        current - previous
    } else {
        previous - current
    };

    // change > threshold  <=>  delta * 10^scale > mantissa * previous
    let lhs = U512::from(delta) * U512::from(10u64).pow(U512::from(threshold.scale()));
    let rhs = U512::from(threshold.mantissa().unsigned_abs()) * U512::from(previous);
    let update = lhs > rhs;

    let change = U512::from(delta) * U512::from(RATE_SCALE) / U512::from(previous);

    tracing::debug!(
        pair = %pair,
        previous = %units::from_chain_units(previous),
        current = %units::from_chain_units(current),
        change = %units::format_fixed(&change.to_string()),
        threshold = %threshold,
        update,
        "Rate update decision"
    );

    update
}
