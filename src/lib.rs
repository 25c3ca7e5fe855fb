//! Cluster signal bot: Binance aggTrade order-flow clusters → signals →
//! oracle-confirmed orders.

pub mod aggregator;
pub mod arbitration;
pub mod backoff;
pub mod binance_feed;
pub mod broker;
pub mod classifier;
pub mod config;
pub mod context;
pub mod decision;
pub mod exit_monitor;
pub mod forwarder;
pub mod journal;
pub mod logging;
pub mod notifier;
pub mod oracle;
pub mod pipeline;
pub mod supervisor;
pub mod types;

pub use config::Config;
pub use decision::Decision;
pub use types::{Candidate, Direction, Signal, TradeEvent};
