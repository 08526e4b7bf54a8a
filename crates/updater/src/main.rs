use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use sanity_common::config::AppConfig;
use sanity_updater::cycle::CallTimeouts;
use sanity_updater::monitor::build_monitor;
use sanity_updater::price_source::{PriceSource, TickerPriceSource};
use sanity_updater::transport::{AlloyRateContract, RateContract};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sanity_updater=info,sanity_common=info".into()),
        )
        .json()
        .init();

    tracing::info!("Sanity rate updater starting...");

    // Load configuration
    let config = AppConfig::from_env()?;
    let tracked = config.load_tracked_set()?;
    let rpc_timeout = Duration::from_millis(config.rpc_timeout_ms);
    let timeouts = CallTimeouts {
        read: rpc_timeout,
        submit: rpc_timeout + Duration::from_millis(config.confirmation_timeout_ms),
    };

    // Connect to the rate contract only when this mode writes rates
    let contract: Option<Arc<dyn RateContract>> = match (
        config.monitor_mode.writes_on_chain(),
        &config.private_key,
        config.contract_address,
    ) {
        (true, Some(private_key), Some(contract_address)) => {
            let contract: Arc<dyn RateContract> = Arc::new(AlloyRateContract::connect(
                &config.rpc_url,
                private_key,
                contract_address,
            )?);
            Some(contract)
        }
        _ => None,
    };

    let prices = TickerPriceSource::new(
        config.price_feed_url.clone(),
        Duration::from_millis(config.price_feed_timeout_ms),
    )?;
    let mut monitor = build_monitor(config.monitor_mode, tracked.clone(), contract, timeouts)?;

    let mut ticker = tokio::time::interval(Duration::from_millis(config.poll_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        action = monitor.name(),
        market = %tracked.market,
        assets = tracked.assets.len(),
        poll_interval_ms = config.poll_interval_ms,
        "Monitor started"
    );

    // Run with graceful shutdown on Ctrl+C
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let observations = prices.observe(&tracked).await;
                monitor.act(&observations).await;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal, stopping gracefully...");
                break;
            }
        }
    }

    tracing::info!("Sanity rate updater stopped.");
    Ok(())
}
