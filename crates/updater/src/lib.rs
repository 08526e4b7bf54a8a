pub mod baseline;
pub mod cycle;
pub mod decision;
pub mod error;
pub mod monitor;
pub mod price_source;
pub mod submitter;
pub mod transport;
pub mod units;
