//! Price observations for the tracked pairs.
//!
//! A price source never fails a tick as a whole: a pair whose price could not
//! be read is reported with no price and is left out of any update.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::task::JoinSet;

use sanity_common::types::{Observation, Pair, TrackedSet};

/// Producer of one observation per tracked pair.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn observe(&self, tracked: &TrackedSet) -> Vec<Observation>;
}

/// Response body of `GET /api/v3/ticker/price`.
#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

/// Ticker API client (`GET {base}/api/v3/ticker/price?symbol=OMGETH`).
#[derive(Clone)]
pub struct TickerPriceSource {
    client: reqwest::Client,
    base_url: String,
}

impl TickerPriceSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Exchange symbol of a pair, e.g. `OMGETH`.
    pub fn ticker_symbol(pair: &Pair) -> String {
        format!("{}{}", pair.asset.symbol, pair.market.symbol).to_uppercase()
    }

    async fn fetch_price(&self, pair: &Pair) -> anyhow::Result<Decimal> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);
        let ticker: TickerPrice = self
            .client
            .get(&url)
            .query(&[("symbol", Self::ticker_symbol(pair))])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_price(&ticker.price)
    }
}

#[async_trait]
impl PriceSource for TickerPriceSource {
    async fn observe(&self, tracked: &TrackedSet) -> Vec<Observation> {
        let pairs = tracked.pairs();
        let mut requests = JoinSet::new();

        for (index, pair) in pairs.iter().cloned().enumerate() {
            let source = self.clone();
            requests.spawn(async move {
                let price = match source.fetch_price(&pair).await {
                    Ok(price) => Some(price),
                    Err(e) => {
                        tracing::warn!(pair = %pair, error = %e, "Could not fetch price");
                        None
                    }
                };
                (index, price)
            });
        }

        let mut prices: Vec<Option<Decimal>> = vec![None; pairs.len()];
        while let Some(joined) = requests.join_next().await {
            match joined {
                Ok((index, price)) => prices[index] = price,
                Err(e) => tracing::warn!(error = %e, "Price request task failed"),
            }
        }

        pairs
            .into_iter()
            .zip(prices)
            .map(|(pair, price)| Observation::new(pair, price))
            .collect()
    }
}

/// Parse a ticker price string, dropping trailing zeros.
fn parse_price(raw: &str) -> anyhow::Result<Decimal> {
    let price = Decimal::from_str(raw.trim())
        .map_err(|e| anyhow::anyhow!("invalid price '{raw}': {e}"))?;
    Ok(price.normalize())
}
