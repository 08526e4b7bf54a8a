//! Update cycle — one polling tick of the rate updater.
//!
//! Steps:
//! 1. Fetch the stored rate of every tracked asset (concurrently)
//! 2. Decide which observed prices moved past their volatility threshold
//! 3. Encode and submit the selected rates in one transaction
//! 4. Report the outcome to the caller for bookkeeping
//!
//! A failed cycle never stops the process; the next tick starts over with a
//! fresh baseline.

use std::sync::Arc;
use std::time::Duration;

use sanity_common::types::{Observation, TrackedSet};

use crate::baseline::BaselineFetcher;
use crate::decision::{self, UpdateBatch};
use crate::error::UpdateError;
use crate::submitter::{SubmissionOutcome, UpdateSubmitter};
use crate::transport::{RateContract, SubmissionReceipt};

/// How a cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    /// No rate needed updating.
    NoOp,
    /// The update transaction was mined.
    Confirmed {
        receipt: SubmissionReceipt,
        updated: usize,
    },
    /// A previous transaction was still pending; nothing applied this cycle.
    RetryableCollision,
    /// The cycle was abandoned.
    Failed(UpdateError),
}

impl CycleOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, CycleOutcome::Confirmed { .. })
    }
}

/// Running totals across cycles, owned by whoever drives the ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub cycles: u64,
    pub updates_requested: u64,
    pub no_ops: u64,
    pub collisions: u64,
    pub failures: u64,
}

impl CycleStats {
    pub fn record(&mut self, outcome: &CycleOutcome) {
        self.cycles += 1;
        match outcome {
            CycleOutcome::NoOp => self.no_ops += 1,
            CycleOutcome::Confirmed { .. } => self.updates_requested += 1,
            CycleOutcome::RetryableCollision => self.collisions += 1,
            CycleOutcome::Failed(_) => self.failures += 1,
        }
    }
}

/// Upper bounds for the contract calls of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    /// Each `tokenRate` read
    pub read: Duration,
    /// The update transaction, from send until its receipt
    pub submit: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(15),
            submit: Duration::from_secs(135),
        }
    }
}

/// Orchestrates baseline fetch, decision and submission for a tracked set.
///
/// Clones share the submitter, so ticks running concurrently still submit
/// one at a time.
#[derive(Clone)]
pub struct UpdateCycle {
    tracked: Arc<TrackedSet>,
    fetcher: Arc<BaselineFetcher>,
    submitter: UpdateSubmitter,
    force: bool,
}

impl UpdateCycle {
    pub fn new(tracked: TrackedSet, contract: Arc<dyn RateContract>) -> Self {
        Self::with_timeouts(tracked, contract, CallTimeouts::default())
    }

    pub fn with_timeouts(
        tracked: TrackedSet,
        contract: Arc<dyn RateContract>,
        timeouts: CallTimeouts,
    ) -> Self {
        Self {
            tracked: Arc::new(tracked),
            fetcher: Arc::new(BaselineFetcher::new(Arc::clone(&contract), timeouts.read)),
            submitter: UpdateSubmitter::new(contract, timeouts.submit),
            force: false,
        }
    }

    /// Push every usable observation, ignoring volatility thresholds.
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn tracked(&self) -> &TrackedSet {
        &self.tracked
    }

    /// Run one cycle against this tick's observations.
    pub async fn run(&self, observations: &[Observation]) -> CycleOutcome {
        let batch = match self.prepare(observations).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(error = %e, "Update cycle skipped");
                return CycleOutcome::Failed(e);
            }
        };

        let updated = batch.len();

        match self.submitter.submit(&batch).await {
            Ok(SubmissionOutcome::NoOp) => CycleOutcome::NoOp,
            Ok(SubmissionOutcome::Confirmed(receipt)) => CycleOutcome::Confirmed { receipt, updated },
            Ok(SubmissionOutcome::RetryableCollision) => CycleOutcome::RetryableCollision,
            Err(e) => {
                tracing::error!(error = %e, "Update cycle failed");
                CycleOutcome::Failed(e)
            }
        }
    }

    async fn prepare(&self, observations: &[Observation]) -> Result<UpdateBatch, UpdateError> {
        let baseline = self.fetcher.fetch(&self.tracked).await?;

        if self.force {
            return Ok(decision::decide_forced(observations));
        }

        Ok(decision::decide(&baseline, observations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;

    #[test]
    fn test_stats_only_count_confirmed_as_updates() {
        let mut stats = CycleStats::default();

        stats.record(&CycleOutcome::NoOp);
        stats.record(&CycleOutcome::RetryableCollision);
        stats.record(&CycleOutcome::Failed(UpdateError::SubmissionFailed(
            TransportError::Rpc("boom".into()),
        )));
        assert_eq!(stats.updates_requested, 0);

        let confirmed = CycleOutcome::Confirmed {
            receipt: SubmissionReceipt {
                tx_hash: "0xaa".into(),
                block_number: Some(1),
                gas_used: 21_000,
            },
            updated: 2,
        };
        assert!(confirmed.is_confirmed());
        stats.record(&confirmed);

        assert_eq!(
            stats,
            CycleStats {
                cycles: 4,
                updates_requested: 1,
                no_ops: 1,
                collisions: 1,
                failures: 1,
            }
        );
    }
}
