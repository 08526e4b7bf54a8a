//! Transport to the on-chain sanity rates contract.
//!
//! The update engine only needs two contract functions:
//!
//! - `tokenRate(address) view returns (uint256)` to read the stored baseline
//! - `setSanityRates(address[] sources, uint256[] rates)` to write a batch
//!
//! [`RateContract`] is the seam the engine is written against.
//! [`AlloyRateContract`] is the production implementation, signing with a
//! local private key over an HTTP provider.

use std::time::Duration;

use alloy::network::{EthereumWallet, ReceiptResponse};
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use async_trait::async_trait;
use thiserror::Error;

// Solidity interface for the sanity rates contract.
// Only the functions we need are defined.
sol! {
    #[sol(rpc)]
    interface ISanityRates {
        /// Returns the stored rate of `token`, scaled by 10^18. Zero if never set.
        function tokenRate(address token) external view returns (uint256);

        /// Stores `rates[i]` as the rate of `sources[i]`.
        function setSanityRates(address[] sources, uint256[] rates) external;
    }
}

/// Node error fragments meaning another transaction from the account is in the mempool.
const PENDING_MARKERS: &[&str] = &[
    "known transaction",
    "already known",
    "replacement transaction underpriced",
    "nonce too low",
];

const CONNECTIVITY_MARKERS: &[&str] = &[
    "error sending request",
    "connection refused",
    "connection reset",
    "dns error",
    "tcp connect error",
];

/// Failures reported by the contract transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connectivity error: {0}")]
    Connectivity(String),

    #[error("RPC call timed out after {0:?}")]
    Timeout(Duration),

    #[error("previous transaction from the signing account is still pending: {0}")]
    PreviousTransactionPending(String),

    #[error("contract call reverted: {0}")]
    Reverted(String),

    #[error("RPC error: {0}")]
    Rpc(String),
}

impl TransportError {
    /// Classify a raw node / transport error message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if PENDING_MARKERS.iter().any(|m| lower.contains(m)) {
            TransportError::PreviousTransactionPending(message)
        } else if CONNECTIVITY_MARKERS.iter().any(|m| lower.contains(m)) {
            TransportError::Connectivity(message)
        } else if lower.contains("execution reverted") {
            TransportError::Reverted(message)
        } else {
            TransportError::Rpc(message)
        }
    }
}

/// Receipt of a confirmed rate update transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

/// The two contract functions the update engine depends on.
#[async_trait]
pub trait RateContract: Send + Sync {
    /// Read the raw stored rate of `asset`.
    async fn token_rate(&self, asset: Address) -> Result<U256, TransportError>;

    /// Write one batch of rates. `sources` and `rates` are index-aligned.
    async fn set_sanity_rates(
        &self,
        sources: Vec<Address>,
        rates: Vec<U256>,
    ) -> Result<SubmissionReceipt, TransportError>;
}

/// Alloy-backed [`RateContract`] signing with a local private key.
pub struct AlloyRateContract {
    contract: ISanityRates::ISanityRatesInstance<DynProvider>,
    account: Address,
}

impl AlloyRateContract {
    pub fn connect(
        rpc_url: &str,
        private_key: &str,
        contract_address: Address,
    ) -> anyhow::Result<Self> {
        let signer: PrivateKeySigner = private_key.trim().parse()?;
        let account = signer.address();

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(rpc_url.parse()?)
            .erased();

        tracing::info!(
            account = %account,
            contract = %contract_address,
            "Rate contract transport ready"
        );

        Ok(Self {
            contract: ISanityRates::new(contract_address, provider),
            account,
        })
    }

    /// The signing account. All submissions from this transport share its nonce.
    pub fn account(&self) -> Address {
        self.account
    }
}

#[async_trait]
impl RateContract for AlloyRateContract {
    async fn token_rate(&self, asset: Address) -> Result<U256, TransportError> {
        self.contract
            .tokenRate(asset)
            .call()
            .await
            .map_err(|e| TransportError::from_message(e.to_string()))
    }

    async fn set_sanity_rates(
        &self,
        sources: Vec<Address>,
        rates: Vec<U256>,
    ) -> Result<SubmissionReceipt, TransportError> {
        let call = self.contract.setSanityRates(sources, rates);

        let pending = call
            .send()
            .await
            .map_err(|e| TransportError::from_message(e.to_string()))?;

        let tx_hash = *pending.tx_hash();
        tracing::debug!(tx_hash = %tx_hash, "Rate update broadcast, waiting for receipt");

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| TransportError::from_message(e.to_string()))?;

        if !receipt.status() {
            return Err(TransportError::Reverted(format!(
                "transaction {tx_hash:#x} reverted"
            )));
        }

        Ok(SubmissionReceipt {
            tx_hash: format!("{:#x}", receipt.transaction_hash()),
            block_number: receipt.block_number(),
            gas_used: receipt.gas_used(),
        })
    }
}
