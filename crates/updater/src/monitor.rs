//! Monitor actions — what happens to each tick's observations.
//!
//! - [`PrintValues`]: print the current prices
//! - [`PrintValuesAndAverage`]: print the prices and a running mean per pair
//! - [`ContractUpdater`]: print the prices and run an [`UpdateCycle`]
//!
//! The forced-update mode is a [`ContractUpdater`] around a forced cycle.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use sanity_common::config::MonitorMode;
use sanity_common::types::{Observation, Pair, TrackedSet};

use crate::cycle::{CallTimeouts, CycleOutcome, CycleStats, UpdateCycle};
use crate::transport::RateContract;

/// A strategy applied to every tick's observations.
#[async_trait]
pub trait MonitorAction: Send {
    async fn act(&mut self, observations: &[Observation]);

    /// Human-readable name, used in logs.
    fn name(&self) -> &'static str;
}

/// Build the monitor action for `mode`.
///
/// `contract` is required by the updating modes and ignored otherwise.
pub fn build_monitor(
    mode: MonitorMode,
    tracked: TrackedSet,
    contract: Option<Arc<dyn RateContract>>,
    timeouts: CallTimeouts,
) -> anyhow::Result<Box<dyn MonitorAction>> {
    let monitor: Box<dyn MonitorAction> = match mode {
        MonitorMode::Print => Box::new(PrintValues),
        MonitorMode::PrintAverage => Box::new(PrintValuesAndAverage::new()),
        MonitorMode::Update | MonitorMode::ForceUpdate => {
            let contract = contract
                .ok_or_else(|| anyhow::anyhow!("MONITOR_ACTION={mode} needs a rate contract"))?;
            let mut cycle = UpdateCycle::with_timeouts(tracked, contract, timeouts);
            if mode == MonitorMode::ForceUpdate {
                cycle = cycle.forced();
            }
            Box::new(ContractUpdater::new(cycle))
        }
    };

    Ok(monitor)
}

/// Prints one line of current prices per tick.
pub struct PrintValues;

#[async_trait]
impl MonitorAction for PrintValues {
    async fn act(&mut self, observations: &[Observation]) {
        println!("{}", format_prices(Utc::now(), observations));
    }

    fn name(&self) -> &'static str {
        "print"
    }
}

/// Running sum and count of the prices seen for one pair.
#[derive(Debug, Clone, Copy, Default)]
struct RunningTotal {
    sum: Decimal,
    count: u64,
}

impl RunningTotal {
    fn add(&mut self, price: Decimal) -> bool {
        match self.sum.checked_add(price) {
            Some(sum) => {
                self.sum = sum;
                self.count += 1;
                true
            }
            None => false,
        }
    }

    fn mean(&self) -> Option<Decimal> {
        if self.count == 0 {
            return None;
        }
        self.sum.checked_div(Decimal::from(self.count))
    }
}

/// Prints current prices and the mean of every price seen so far.
///
/// Memory stays constant over time: only a sum and a count are kept per pair.
#[derive(Default)]
pub struct PrintValuesAndAverage {
    totals: HashMap<Pair, RunningTotal>,
    order: Vec<Pair>,
}

impl PrintValuesAndAverage {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, observations: &[Observation]) {
        for observation in observations {
            let Some(price) = observation.usable_price() else {
                continue;
            };
            let total = self.totals.entry(observation.pair.clone()).or_insert_with(|| {
                self.order.push(observation.pair.clone());
                RunningTotal::default()
            });
            if !total.add(price) {
                tracing::warn!(pair = %observation.pair, price = %price, "Running sum overflowed, price left out of average");
            }
        }
    }

    /// Running mean per pair, in first-seen order.
    pub fn averages(&self) -> Vec<(Pair, Decimal)> {
        self.order
            .iter()
            .filter_map(|pair| {
                let avg = self.totals.get(pair)?.mean()?;
                Some((pair.clone(), avg))
            })
            .collect()
    }
}

#[async_trait]
impl MonitorAction for PrintValuesAndAverage {
    async fn act(&mut self, observations: &[Observation]) {
        println!("{}", format_prices(Utc::now(), observations));
        self.record(observations);
        println!("{}", format_averages(&self.averages()));
    }

    fn name(&self) -> &'static str {
        "print_average"
    }
}

/// Prints current prices, then pushes stale rates on-chain.
pub struct ContractUpdater {
    cycle: UpdateCycle,
    stats: CycleStats,
}

impl ContractUpdater {
    pub fn new(cycle: UpdateCycle) -> Self {
        Self {
            cycle,
            stats: CycleStats::default(),
        }
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }
}

#[async_trait]
impl MonitorAction for ContractUpdater {
    async fn act(&mut self, observations: &[Observation]) {
        println!("{}", format_prices(Utc::now(), observations));

        let outcome = self.cycle.run(observations).await;
        self.stats.record(&outcome);

        match &outcome {
            CycleOutcome::Confirmed { receipt, updated } => tracing::info!(
                update = self.stats.updates_requested,
                rates = updated,
                tx_hash = %receipt.tx_hash,
                "Sanity rates updated"
            ),
            CycleOutcome::RetryableCollision => tracing::info!(
                collisions = self.stats.collisions,
                "Update deferred to next tick"
            ),
            CycleOutcome::NoOp | CycleOutcome::Failed(_) => {}
        }

        tracing::debug!(
            cycles = self.stats.cycles,
            updates = self.stats.updates_requested,
            failures = self.stats.failures,
            "Cycle finished"
        );
    }

    fn name(&self) -> &'static str {
        "update"
    }
}

/// `2024-01-31 12:00:00 OMG/ETH:   0.016883	KNC/ETH:  0.0021`
pub fn format_prices(now: DateTime<Utc>, observations: &[Observation]) -> String {
    let prices: Vec<String> = observations
        .iter()
        .filter_map(|o| {
            let price = o.price?;
            let shown = price.round_sf(5).unwrap_or(price).normalize();
            Some(format!("{}: {:>10}", o.pair, shown.to_string()))
        })
        .collect();

    format!("{} {}", now.format("%Y-%m-%d %H:%M:%S"), prices.join("\t"))
}

pub fn format_averages(averages: &[(Pair, Decimal)]) -> String {
    let parts: Vec<String> = averages
        .iter()
        .map(|(pair, avg)| format!("{pair}: {}", avg.round_dp(10).normalize()))
        .collect();
    format!("Average:\n {}\n", parts.join("\t"))
}
