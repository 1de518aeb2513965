//! # Overlay Hedger
//!
//! Correlation-driven pair hedging across a universe of instruments: pairs
//! whose closes move together are tracked, and when one leg's price range
//! drifts away from the other's (overlaid onto the same scale) the engine
//! opens a two-leg hedge and closes it once the divergence pays back.
//!
//! ## Architecture
//!
//! - `market`: Instrument metadata, bars and quotes
//! - `stats`: Rolling per-instrument price windows and ATR
//! - `strategy`: Pair catalog, overlay detection, hedge ledger and the engine
//! - `execution`: Target-exposure bookkeeping and the paper venue
//! - `session` / `feed`: Event routing from producers to the engine and venue
//! - `persistence`: SQLite hedge journal
//! - `backtest`: Historical replay and parameter optimization
//! - `config`: Configuration management and validation
//! - `utils`: Shared decimal helpers

pub mod backtest;
pub mod config;
pub mod error;
pub mod execution;
pub mod feed;
pub mod market;
pub mod persistence;
pub mod session;
pub mod stats;
pub mod strategy;
pub mod utils;

pub use config::Config;
