//! Backtesting for the overlay hedger.
//!
//! This module provides:
//! - Historical bar loading from CSV
//! - Replay of bars through a hedge session on the paper venue
//! - Parameter sweep for optimization
//! - Performance metrics calculation
//!
//! # Example
//!
//! ```rust,ignore
//! use overlay_hedger::backtest::{BacktestConfig, BacktestEngine, CsvBarLoader};
//!
//! let loader = CsvBarLoader::new("data/bars.csv")?;
//! let mut engine = BacktestEngine::new(loader, config, BacktestConfig::default());
//!
//! let result = engine.run(start, end).await?;
//! println!("Return: {:.2}%", result.metrics.total_return_pct);
//! ```

mod data;
mod engine;
mod metrics;
mod runner;

pub use data::{BarRecord, CsvBarLoader, DataLoader, MarketSnapshot};
pub use engine::{BacktestEngine, BacktestResult};
pub use metrics::{BacktestMetrics, EquityPoint};
pub use runner::{ParameterSpace, SweepResults, SweepRunner};

use serde::{Deserialize, Serialize};

/// Configuration for a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Whether to record every equity point (can use lots of memory)
    pub record_equity_curve: bool,

    /// Journal hedges and equity to this SQLite file (optional)
    pub journal_path: Option<String>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            record_equity_curve: true,
            journal_path: None,
        }
    }
}
