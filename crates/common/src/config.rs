use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use alloy::primitives::Address;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::AppError;
use crate::types::{Asset, Market, TrackedSet};

/// What the process does with each tick's observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    /// Print current prices only.
    Print,
    /// Print current prices and the running average per pair.
    PrintAverage,
    /// Push rates that moved past their volatility threshold.
    Update,
    /// Push every usable rate on every tick.
    ForceUpdate,
}

impl MonitorMode {
    /// Whether this mode talks to the rate contract.
    pub fn writes_on_chain(&self) -> bool {
        matches!(self, MonitorMode::Update | MonitorMode::ForceUpdate)
    }
}

impl FromStr for MonitorMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "print" => Ok(MonitorMode::Print),
            "print_average" => Ok(MonitorMode::PrintAverage),
            "update" => Ok(MonitorMode::Update),
            "force_update" => Ok(MonitorMode::ForceUpdate),
            other => Err(AppError::Config(format!(
                "unknown MONITOR_ACTION '{other}' (expected print, print_average, update or force_update)"
            ))),
        }
    }
}

impl std::fmt::Display for MonitorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorMode::Print => write!(f, "print"),
            MonitorMode::PrintAverage => write!(f, "print_average"),
            MonitorMode::Update => write!(f, "update"),
            MonitorMode::ForceUpdate => write!(f, "force_update"),
        }
    }
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// JSON-RPC endpoint of the node hosting the rate contract
    pub rpc_url: String,

    /// Hex private key of the account that signs rate updates
    pub private_key: Option<String>,

    /// Address of the deployed sanity rates contract
    pub contract_address: Option<Address>,

    /// Path to the tracked assets file
    pub assets_file: String,

    /// Polling interval in milliseconds (default: 60000)
    pub poll_interval_ms: u64,

    /// Upper bound for a single RPC call in milliseconds (default: 15000)
    pub rpc_timeout_ms: u64,

    /// How long to wait for an update transaction to be mined (default: 120000)
    pub confirmation_timeout_ms: u64,

    /// Base URL of the ticker price feed
    pub price_feed_url: String,

    /// Upper bound for one price feed request in milliseconds (default: 10000)
    pub price_feed_timeout_ms: u64,

    /// Action run on every tick
    pub monitor_mode: MonitorMode,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let contract_address = match std::env::var("CONTRACT_ADDRESS") {
            Ok(raw) => Some(
                Address::from_str(raw.trim())
                    .map_err(|_| anyhow::anyhow!("CONTRACT_ADDRESS must be a valid address"))?,
            ),
            Err(_) => None,
        };

        let config = Self {
            rpc_url: std::env::var("RPC_URL")
                .unwrap_or_else(|_| "http://localhost:8545".to_string()),
            private_key: std::env::var("PRIVATE_KEY").ok(),
            contract_address,
            assets_file: std::env::var("ASSETS_FILE")
                .unwrap_or_else(|_| "assets.json".to_string()),
            poll_interval_ms: std::env::var("POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "60000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("POLL_INTERVAL_MS must be a valid u64"))?,
            rpc_timeout_ms: std::env::var("RPC_TIMEOUT_MS")
                .unwrap_or_else(|_| "15000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RPC_TIMEOUT_MS must be a valid u64"))?,
            confirmation_timeout_ms: std::env::var("CONFIRMATION_TIMEOUT_MS")
                .unwrap_or_else(|_| "120000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("CONFIRMATION_TIMEOUT_MS must be a valid u64"))?,
            price_feed_url: std::env::var("PRICE_FEED_URL")
                .unwrap_or_else(|_| "https://api.binance.com".to_string()),
            price_feed_timeout_ms: std::env::var("PRICE_FEED_TIMEOUT_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PRICE_FEED_TIMEOUT_MS must be a valid u64"))?,
            monitor_mode: std::env::var("MONITOR_ACTION")
                .unwrap_or_else(|_| "print".to_string())
                .parse()?,
        };

        if config.monitor_mode.writes_on_chain() {
            if config.private_key.is_none() {
                anyhow::bail!("PRIVATE_KEY is required for MONITOR_ACTION={}", config.monitor_mode);
            }
            if config.contract_address.is_none() {
                anyhow::bail!(
                    "CONTRACT_ADDRESS is required for MONITOR_ACTION={}",
                    config.monitor_mode
                );
            }
        }

        Ok(config)
    }

    /// Load the tracked asset set from `assets_file`.
    pub fn load_tracked_set(&self) -> Result<TrackedSet, AppError> {
        load_tracked_set(&self.assets_file)
    }
}

/// On-disk layout of the assets file.
#[derive(Debug, Deserialize)]
struct AssetsFile {
    market: String,
    assets: Vec<AssetEntry>,
}

#[derive(Debug, Deserialize)]
struct AssetEntry {
    symbol: String,
    address: String,
    volatility: Decimal,
}

/// Read and validate a tracked asset set from a JSON file.
pub fn load_tracked_set(path: impl AsRef<Path>) -> Result<TrackedSet, AppError> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let set = parse_tracked_set(&raw)?;

    tracing::info!(
        path = %path.as_ref().display(),
        market = %set.market,
        assets = set.assets.len(),
        "Loaded tracked assets"
    );
    Ok(set)
}

/// Parse and validate a tracked asset set from its JSON text.
pub fn parse_tracked_set(raw: &str) -> Result<TrackedSet, AppError> {
    let file: AssetsFile = serde_json::from_str(raw)?;

    if file.market.trim().is_empty() {
        return Err(AppError::Validation("market symbol must not be empty".into()));
    }

    let mut seen = HashSet::new();
    let mut assets = Vec::with_capacity(file.assets.len());

    for entry in file.assets {
        let address = Address::from_str(entry.address.trim()).map_err(|_| {
            AppError::Validation(format!(
                "asset {} has an invalid address '{}'",
                entry.symbol, entry.address
            ))
        })?;

        if entry.volatility <= Decimal::ZERO || entry.volatility > Decimal::ONE {
            return Err(AppError::Validation(format!(
                "asset {} volatility must be in (0, 1], got {}",
                entry.symbol, entry.volatility
            )));
        }

        if !seen.insert(address) {
            return Err(AppError::Validation(format!(
                "asset address {address} is listed more than once"
            )));
        }

        assets.push(Asset::new(entry.symbol, address, entry.volatility));
    }

    Ok(TrackedSet {
        market: Market::new(file.market),
        assets,
    })
}
