//! Update submitter — encodes a batch and sends it in a single transaction.
//!
//! Every submission from one signing account shares that account's nonce
//! sequence, so the submitter only lets one submission be in flight at a time.
//! Baseline reads never take this lock.
//!
//! The write, including the wait for its receipt, is bounded by the submit
//! timeout. The lock is released when the timeout fires.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use tokio::sync::Mutex;

use crate::decision::UpdateBatch;
use crate::error::UpdateError;
use crate::transport::{RateContract, SubmissionReceipt, TransportError};
use crate::units;

/// Result of handing a batch to the submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Nothing to update; no transaction was sent.
    NoOp,
    /// The batch was mined successfully.
    Confirmed(SubmissionReceipt),
    /// A previous transaction from the account is still pending. Nothing was
    /// applied; a later tick submits again with a fresh nonce.
    RetryableCollision,
}

/// Aligned contract arguments for `setSanityRates`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetterArgs {
    pub sources: Vec<Address>,
    pub rates: Vec<U256>,
}

impl SetterArgs {
    pub fn from_batch(batch: &UpdateBatch) -> Result<Self, UpdateError> {
        let mut sources = Vec::with_capacity(batch.len());
        let mut rates = Vec::with_capacity(batch.len());

        for entry in batch.entries() {
            let rate = units::to_chain_units(entry.price).map_err(|source| UpdateError::Encode {
                asset: entry.asset.symbol.clone(),
                source,
            })?;
            sources.push(entry.asset.address);
            rates.push(rate);
        }

        Ok(Self { sources, rates })
    }
}

/// Sends rate batches to the contract, one at a time.
#[derive(Clone)]
pub struct UpdateSubmitter {
    contract: Arc<dyn RateContract>,
    in_flight: Arc<Mutex<()>>,
    submit_timeout: Duration,
}

impl UpdateSubmitter {
    pub fn new(contract: Arc<dyn RateContract>, submit_timeout: Duration) -> Self {
        Self {
            contract,
            in_flight: Arc::new(Mutex::new(())),
            submit_timeout,
        }
    }

    /// Submit `batch` as one `setSanityRates` call.
    ///
    /// Waits for any submission already in flight on this submitter (or its
    /// clones) to finish first.
    pub async fn submit(&self, batch: &UpdateBatch) -> Result<SubmissionOutcome, UpdateError> {
        if batch.is_empty() {
            tracing::info!("No updates required");
            return Ok(SubmissionOutcome::NoOp);
        }

        let args = SetterArgs::from_batch(batch)?;

        let _guard = self.in_flight.lock().await;
        tracing::info!(entries = batch.len(), batch = %batch, "Submitting rate update");

        let write = self.contract.set_sanity_rates(args.sources, args.rates);
        let result = tokio::time::timeout(self.submit_timeout, write)
            .await
            .unwrap_or(Err(TransportError::Timeout(self.submit_timeout)));

        match result {
            Ok(receipt) => {
                tracing::info!(
                    tx_hash = %receipt.tx_hash,
                    block = receipt.block_number,
                    gas_used = receipt.gas_used,
                    "Rate update confirmed"
                );
                Ok(SubmissionOutcome::Confirmed(receipt))
            }
            Err(TransportError::PreviousTransactionPending(detail)) => {
                tracing::warn!(
                    detail = %detail,
                    "Previous transaction still pending, leaving update for a later tick"
                );
                Ok(SubmissionOutcome::RetryableCollision)
            }
            Err(e) => Err(UpdateError::SubmissionFailed(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::Baseline;
    use crate::decision::decide;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use sanity_common::types::{Asset, Market, Observation, Pair};
    use std::str::FromStr;
    use std::sync::Mutex as StdMutex;

    const SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);

    struct RecordingContract {
        result: Result<SubmissionReceipt, TransportError>,
        calls: StdMutex<Vec<(Vec<Address>, Vec<U256>)>>,
        delay: Option<Duration>,
    }

    impl RecordingContract {
        fn new(result: Result<SubmissionReceipt, TransportError>) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: StdMutex::new(Vec::new()),
                delay: None,
            })
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self {
                result: Ok(receipt()),
                calls: StdMutex::new(Vec::new()),
                delay: Some(Duration::from_secs(3600)),
            })
        }
    }

    #[async_trait]
    impl RateContract for RecordingContract {
        async fn token_rate(&self, _asset: Address) -> Result<U256, TransportError> {
            Ok(U256::ZERO)
        }

        async fn set_sanity_rates(
            &self,
            sources: Vec<Address>,
            rates: Vec<U256>,
        ) -> Result<SubmissionReceipt, TransportError> {
            self.calls.lock().unwrap().push((sources, rates));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.result.clone()
        }
    }

    fn receipt() -> SubmissionReceipt {
        SubmissionReceipt {
            tx_hash: "0x01".to_string(),
            block_number: Some(7),
            gas_used: 50_000,
        }
    }

    fn batch(prices: &[(u8, &str)]) -> UpdateBatch {
        let observations: Vec<Observation> = prices
            .iter()
            .map(|(byte, price)| {
                Observation::new(
                    Pair::new(
                        Asset::new(format!("T{byte}"), Address::repeat_byte(*byte), Decimal::new(5, 2)),
                        Market::new("ETH"),
                    ),
                    Some(Decimal::from_str(price).unwrap()),
                )
            })
            .collect();
        decide(&Baseline::new(), &observations)
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let contract = RecordingContract::new(Ok(receipt()));
        let submitter = UpdateSubmitter::new(contract.clone(), SUBMIT_TIMEOUT);

        let outcome = submitter.submit(&UpdateBatch::default()).await.unwrap();
        assert_eq!(outcome, SubmissionOutcome::NoOp);
        assert!(contract.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submits_aligned_arguments() {
        let contract = RecordingContract::new(Ok(receipt()));
        let submitter = UpdateSubmitter::new(contract.clone(), SUBMIT_TIMEOUT);

        let outcome = submitter
            .submit(&batch(&[(1, "0.016883"), (2, "2")]))
            .await
            .unwrap();
        assert_eq!(outcome, SubmissionOutcome::Confirmed(receipt()));

        let calls = contract.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (sources, rates) = &calls[0];
        assert_eq!(
            sources,
            &vec![Address::repeat_byte(1), Address::repeat_byte(2)]
        );
        assert_eq!(
            rates,
            &vec![
                U256::from(16_883_000_000_000_000u64),
                U256::from(2_000_000_000_000_000_000u128),
            ]
        );
    }

    #[tokio::test]
    async fn test_pending_transaction_is_retryable() {
        let contract = RecordingContract::new(Err(TransportError::PreviousTransactionPending(
            "known transaction".into(),
        )));
        let submitter = UpdateSubmitter::new(contract.clone(), SUBMIT_TIMEOUT);

        let outcome = submitter.submit(&batch(&[(1, "1")])).await.unwrap();
        assert_eq!(outcome, SubmissionOutcome::RetryableCollision);
        // Not resent
        assert_eq!(contract.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_other_failures_are_fatal() {
        let contract = RecordingContract::new(Err(TransportError::Reverted(
            "execution reverted".into(),
        )));
        let submitter = UpdateSubmitter::new(contract.clone(), SUBMIT_TIMEOUT);

        let err = submitter.submit(&batch(&[(1, "1")])).await.unwrap_err();
        assert!(matches!(
            err,
            UpdateError::SubmissionFailed(TransportError::Reverted(_))
        ));
        assert_eq!(contract.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_hanging_write_times_out_and_releases_lock() {
        let contract = RecordingContract::hanging();
        let submitter = UpdateSubmitter::new(contract.clone(), Duration::from_millis(50));

        let err = submitter.submit(&batch(&[(1, "1")])).await.unwrap_err();
        assert!(matches!(
            err,
            UpdateError::SubmissionFailed(TransportError::Timeout(d)) if d == Duration::from_millis(50)
        ));

        // The next submission is not blocked by the abandoned one
        let err = submitter.submit(&batch(&[(1, "1")])).await.unwrap_err();
        assert!(matches!(err, UpdateError::SubmissionFailed(TransportError::Timeout(_))));
        assert_eq!(contract.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_setter_args_alignment() {
        let args = SetterArgs::from_batch(&batch(&[(3, "0.5"), (1, "1.25"), (2, "4")])).unwrap();
        assert_eq!(args.sources.len(), args.rates.len());
        assert_eq!(args.sources[0], Address::repeat_byte(3));
        assert_eq!(args.rates[1], U256::from(1_250_000_000_000_000_000u128));
    }
}
