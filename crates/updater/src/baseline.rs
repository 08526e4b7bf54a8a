//! Baseline fetcher — reads the currently stored rate of every tracked asset.
//!
//! One `tokenRate` read is spawned per asset and all of them are joined. The
//! first failed read aborts the remaining ones: deciding updates against a
//! partial baseline could send spurious updates or miss needed ones, so a
//! baseline is either complete or not returned at all.
//!
//! Every read is bounded by the fetcher's read timeout; an expired read
//! counts as a failed read.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use tokio::task::JoinSet;

use sanity_common::types::{Asset, Pair, TrackedSet};

use crate::error::UpdateError;
use crate::transport::{RateContract, TransportError};

/// Raw on-chain rates of one cycle, keyed by pair.
pub type Baseline = HashMap<Pair, U256>;

/// Concurrent reader of the rates currently stored in the contract.
pub struct BaselineFetcher {
    contract: Arc<dyn RateContract>,
    read_timeout: Duration,
}

impl BaselineFetcher {
    pub fn new(contract: Arc<dyn RateContract>, read_timeout: Duration) -> Self {
        Self {
            contract,
            read_timeout,
        }
    }

    /// Fetch the stored rate of every tracked asset.
    ///
    /// Returns `UpdateError::BaselineFetchFailed` naming the first asset whose
    /// read failed; in-flight reads for the other assets are cancelled.
    pub async fn fetch(&self, tracked: &TrackedSet) -> Result<Baseline, UpdateError> {
        let mut reads: JoinSet<(Asset, Result<U256, TransportError>)> = JoinSet::new();

        for asset in &tracked.assets {
            let contract = Arc::clone(&self.contract);
            let asset = asset.clone();
            let read_timeout = self.read_timeout;
            reads.spawn(async move {
                let rate = tokio::time::timeout(read_timeout, contract.token_rate(asset.address))
                    .await
                    .unwrap_or(Err(TransportError::Timeout(read_timeout)));
                (asset, rate)
            });
        }

        let mut baseline = Baseline::with_capacity(tracked.assets.len());

        while let Some(joined) = reads.join_next().await {
            let (asset, rate) = joined.map_err(|e| UpdateError::BaselineTaskFailed(e.to_string()))?;

            match rate {
                Ok(raw) => {
                    tracing::debug!(asset = %asset, raw_rate = %raw, "Fetched stored rate");
                    baseline.insert(Pair::new(asset, tracked.market.clone()), raw);
                }
                Err(source) => {
                    reads.abort_all();
                    tracing::warn!(
                        asset = %asset,
                        address = %asset.address,
                        error = %source,
                        "Could not get current rate, abandoning baseline"
                    );
                    return Err(UpdateError::BaselineFetchFailed {
                        asset: asset.symbol.clone(),
                        source,
                    });
                }
            }
        }

        Ok(baseline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SubmissionReceipt;
    use alloy::primitives::Address;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use sanity_common::types::Market;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    const READ_TIMEOUT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct FixedRates {
        rates: HashMap<Address, Result<U256, TransportError>>,
        slow: HashMap<Address, Duration>,
        completed: AtomicUsize,
    }

    impl FixedRates {
        fn with_rates(rates: HashMap<Address, Result<U256, TransportError>>) -> Self {
            Self {
                rates,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl RateContract for FixedRates {
        async fn token_rate(&self, asset: Address) -> Result<U256, TransportError> {
            if let Some(delay) = self.slow.get(&asset) {
                tokio::time::sleep(*delay).await;
            }
            self.completed.fetch_add(1, Ordering::SeqCst);
            self.rates
                .get(&asset)
                .cloned()
                .unwrap_or(Ok(U256::ZERO))
        }

        async fn set_sanity_rates(
            &self,
            _sources: Vec<Address>,
            _rates: Vec<U256>,
        ) -> Result<SubmissionReceipt, TransportError> {
            unreachable!("fetcher never writes")
        }
    }

    fn tracked(bytes: &[u8]) -> TrackedSet {
        TrackedSet {
            market: Market::new("ETH"),
            assets: bytes
                .iter()
                .map(|b| Asset::new(format!("T{b}"), Address::repeat_byte(*b), Decimal::new(5, 2)))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_fetch_all_rates() {
        let mut rates = HashMap::new();
        rates.insert(Address::repeat_byte(1), Ok(U256::from(100)));
        rates.insert(Address::repeat_byte(2), Ok(U256::from(200)));
        let fetcher = BaselineFetcher::new(Arc::new(FixedRates::with_rates(rates)), READ_TIMEOUT);

        let set = tracked(&[1, 2, 3]);
        let baseline = fetcher.fetch(&set).await.unwrap();

        assert_eq!(baseline.len(), 3);
        let pairs = set.pairs();
        assert_eq!(baseline[&pairs[0]], U256::from(100));
        assert_eq!(baseline[&pairs[1]], U256::from(200));
        assert_eq!(baseline[&pairs[2]], U256::ZERO);
    }

    #[tokio::test]
    async fn test_single_failure_aborts_fetch() {
        let mut rates = HashMap::new();
        rates.insert(Address::repeat_byte(1), Ok(U256::from(100)));
        rates.insert(
            Address::repeat_byte(2),
            Err(TransportError::Connectivity("connection refused".into())),
        );
        let fetcher = BaselineFetcher::new(Arc::new(FixedRates::with_rates(rates)), READ_TIMEOUT);

        let err = fetcher.fetch(&tracked(&[1, 2, 3])).await.unwrap_err();
        match err {
            UpdateError::BaselineFetchFailed { asset, source } => {
                assert_eq!(asset, "T2");
                assert!(matches!(source, TransportError::Connectivity(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_tracked_set() {
        let fetcher = BaselineFetcher::new(Arc::new(FixedRates::default()), READ_TIMEOUT);
        assert!(fetcher.fetch(&tracked(&[])).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_cancels_slow_reads() {
        let mut contract = FixedRates::default();
        contract.rates.insert(
            Address::repeat_byte(1),
            Err(TransportError::Connectivity("connection refused".into())),
        );
        contract.slow.insert(Address::repeat_byte(2), Duration::from_secs(5));
        let contract = Arc::new(contract);
        let fetcher = BaselineFetcher::new(contract.clone(), Duration::from_secs(30));

        let started = Instant::now();
        let err = fetcher.fetch(&tracked(&[1, 2])).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1), "fetch waited for the slow read");
        assert!(matches!(err, UpdateError::BaselineFetchFailed { ref asset, .. } if asset == "T1"));

        // Only the failing read finished; the slow one was aborted
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(contract.completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hanging_read_times_out() {
        let mut contract = FixedRates::default();
        contract.rates.insert(Address::repeat_byte(1), Ok(U256::from(100)));
        contract.slow.insert(Address::repeat_byte(2), Duration::from_secs(3600));
        let fetcher = BaselineFetcher::new(Arc::new(contract), Duration::from_millis(50));

        let started = Instant::now();
        let err = fetcher.fetch(&tracked(&[1, 2])).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        match err {
            UpdateError::BaselineFetchFailed { asset, source } => {
                assert_eq!(asset, "T2");
                assert_eq!(source, TransportError::Timeout(Duration::from_millis(50)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
