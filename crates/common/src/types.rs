use std::hash::{Hash, Hasher};

use alloy::primitives::Address;
use rust_decimal::Decimal;

/// A token whose sanity rate is kept on-chain.
///
/// Two assets are the same asset when they share an on-chain address; the
/// symbol and threshold are descriptive.
#[derive(Debug, Clone)]
pub struct Asset {
    pub symbol: String,
    pub address: Address,
    /// Fractional change (exclusive lower bound) required before an update is sent.
    pub volatility_threshold: Decimal,
}

impl Asset {
    pub fn new(symbol: impl Into<String>, address: Address, volatility_threshold: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            address,
            volatility_threshold,
        }
    }
}

impl PartialEq for Asset {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Asset {}

impl Hash for Asset {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

/// The quote market every tracked asset is priced in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Market {
    pub symbol: String,
}

impl Market {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
        }
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

/// An asset priced in a market. Keyed by `(asset address, market symbol)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pair {
    pub asset: Asset,
    pub market: Market,
}

impl Pair {
    pub fn new(asset: Asset, market: Market) -> Self {
        Self { asset, market }
    }
}

impl std::fmt::Display for Pair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.asset.symbol, self.market.symbol)
    }
}

/// A price reading for one pair, taken once per polling tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub pair: Pair,
    pub price: Option<Decimal>,
}

impl Observation {
    pub fn new(pair: Pair, price: Option<Decimal>) -> Self {
        Self { pair, price }
    }

    /// The observed price, if it can be used for an update.
    ///
    /// Missing and non-positive prices are both treated as "no reading".
    pub fn usable_price(&self) -> Option<Decimal> {
        self.price.filter(|p| p.is_sign_positive() && !p.is_zero())
    }
}

/// The tracked assets and the market they are quoted in.
#[derive(Debug, Clone)]
pub struct TrackedSet {
    pub market: Market,
    pub assets: Vec<Asset>,
}

impl TrackedSet {
    /// Every `(asset, market)` pair in tracking order.
    pub fn pairs(&self) -> Vec<Pair> {
        self.assets
            .iter()
            .map(|asset| Pair::new(asset.clone(), self.market.clone()))
            .collect()
    }
}
