//! Parameter sweep runner for backtesting optimization.
//!
//! Allows testing multiple config combinations in parallel.

use crate::backtest::{BacktestConfig, BacktestEngine, BacktestResult, DataLoader};
use crate::config::Config;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Defines the parameter space to explore during optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpace {
    // Pair selection
    pub correlation_threshold: Vec<Decimal>,

    // Entry
    pub overlay_threshold: Vec<Decimal>,

    // Exit
    pub take_profit_points: Vec<Decimal>,

    // Risk
    pub max_open_pairs: Vec<usize>,
}

impl Default for ParameterSpace {
    fn default() -> Self {
        Self {
            correlation_threshold: vec![dec!(0.80), dec!(0.85), dec!(0.90)],
            overlay_threshold: vec![dec!(50), dec!(100), dec!(150)],
            take_profit_points: vec![dec!(50), dec!(100), dec!(200)],
            max_open_pairs: vec![1, 2, 4],
        }
    }
}

impl ParameterSpace {
    /// Create a minimal parameter space for quick testing.
    pub fn minimal() -> Self {
        Self {
            correlation_threshold: vec![dec!(0.90)],
            overlay_threshold: vec![dec!(100)],
            take_profit_points: vec![dec!(100)],
            max_open_pairs: vec![2],
        }
    }

    pub fn combination_count(&self) -> usize {
        self.correlation_threshold.len()
            * self.overlay_threshold.len()
            * self.take_profit_points.len()
            * self.max_open_pairs.len()
    }

    /// Generate all config combinations.
    pub fn generate_configs(&self, base_config: &Config) -> Vec<Config> {
        let mut configs = Vec::with_capacity(self.combination_count());

        for &correlation_threshold in &self.correlation_threshold {
            for &overlay_threshold in &self.overlay_threshold {
                for &take_profit_points in &self.take_profit_points {
                    for &max_open_pairs in &self.max_open_pairs {
                        let mut config = base_config.clone();
                        config.pairs.correlation_threshold = correlation_threshold;
                        config.overlay.threshold = overlay_threshold;
                        config.exit.take_profit_points = take_profit_points;
                        config.risk.max_open_pairs = max_open_pairs;
                        configs.push(config);
                    }
                }
            }
        }

        configs
    }

    /// Describe a config's parameter values.
    pub fn describe_config(config: &Config) -> String {
        format!(
            "corr≥{:.2} overlay≥{}pt tp={}pt maxpairs={}",
            config.pairs.correlation_threshold,
            config.overlay.threshold,
            config.exit.take_profit_points,
            config.risk.max_open_pairs,
        )
    }
}

/// Results from a parameter sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepResults {
    /// All individual run results
    pub runs: Vec<(Config, BacktestResult)>,

    /// Best config by Sharpe ratio
    pub best_by_sharpe: Option<usize>,

    /// Best config by total return
    pub best_by_return: Option<usize>,

    pub total_combinations: usize,
    pub successful_runs: usize,
    pub failed_runs: usize,
}

impl SweepResults {
    pub fn best_sharpe(&self) -> Option<&(Config, BacktestResult)> {
        self.best_by_sharpe.and_then(|i| self.runs.get(i))
    }

    pub fn best_return(&self) -> Option<&(Config, BacktestResult)> {
        self.best_by_return.and_then(|i| self.runs.get(i))
    }

    /// Export results to CSV.
    pub fn to_csv(&self, path: &str) -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::File::create(path)?;

        writeln!(
            file,
            "correlation_threshold,overlay_threshold,take_profit_points,max_open_pairs,total_return_pct,sharpe_ratio,max_dd_pct,hedges_opened,hedges_closed,win_rate,total_points"
        )?;

        for (config, result) in &self.runs {
            writeln!(
                file,
                "{},{},{},{},{},{},{},{},{},{},{}",
                config.pairs.correlation_threshold,
                config.overlay.threshold,
                config.exit.take_profit_points,
                config.risk.max_open_pairs,
                result.metrics.total_return_pct,
                result.metrics.sharpe_ratio,
                result.metrics.max_drawdown * dec!(100),
                result.metrics.hedges_opened,
                result.metrics.hedges_closed,
                result.metrics.win_rate,
                result.metrics.total_points,
            )?;
        }

        Ok(())
    }

    /// Generate a summary comparison table.
    pub fn summary(&self) -> String {
        let mut s = String::new();

        s.push_str("═══════════════════════════════════════════════════════════════\n");
        s.push_str("PARAMETER SWEEP RESULTS\n");
        s.push_str("═══════════════════════════════════════════════════════════════\n");
        s.push_str(&format!(
            "Total: {} | Successful: {} | Failed: {}\n\n",
            self.total_combinations, self.successful_runs, self.failed_runs
        ));

        if let Some((config, result)) = self.best_sharpe() {
            s.push_str("BEST BY SHARPE RATIO:\n");
            s.push_str(&format!("  Config: {}\n", ParameterSpace::describe_config(config)));
            s.push_str(&format!(
                "  Sharpe: {:.3} | Return: {:.2}% | Hedges: {}\n\n",
                result.metrics.sharpe_ratio,
                result.metrics.total_return_pct,
                result.metrics.hedges_closed
            ));
        }

        if let Some((config, result)) = self.best_return() {
            s.push_str("BEST BY RETURN:\n");
            s.push_str(&format!("  Config: {}\n", ParameterSpace::describe_config(config)));
            s.push_str(&format!(
                "  Return: {:.2}% | Sharpe: {:.3} | MaxDD: {:.2}%\n",
                result.metrics.total_return_pct,
                result.metrics.sharpe_ratio,
                result.metrics.max_drawdown * dec!(100)
            ));
        }

        s.push_str("═══════════════════════════════════════════════════════════════\n");

        s
    }
}

/// Parameter sweep runner for parallel backtesting.
pub struct SweepRunner {
    parameter_space: ParameterSpace,
    base_config: Config,
    backtest_config: BacktestConfig,
    parallelism: usize,
}

impl SweepRunner {
    pub fn new(
        parameter_space: ParameterSpace,
        base_config: Config,
        backtest_config: BacktestConfig,
        parallelism: usize,
    ) -> Self {
        Self {
            parameter_space,
            base_config,
            // Concurrent runs must not share one journal file
            backtest_config: BacktestConfig {
                journal_path: None,
                ..backtest_config
            },
            parallelism: parallelism.max(1),
        }
    }

    /// Run the parameter sweep.
    pub async fn run<D: DataLoader + Clone + 'static>(
        &self,
        data_loader: D,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SweepResults> {
        let configs = self.parameter_space.generate_configs(&self.base_config);
        let total_combinations = configs.len();

        info!(
            "Starting parameter sweep with {} combinations, parallelism={}",
            total_combinations, self.parallelism
        );

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let data_loader = Arc::new(data_loader);

        let mut handles = Vec::with_capacity(configs.len());

        for (i, config) in configs.into_iter().enumerate() {
            let sem = semaphore.clone();
            let loader = data_loader.clone();
            let bt_config = self.backtest_config.clone();

            let handle = tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return None;
                };

                info!(
                    "[{}/{}] Testing: {}",
                    i + 1,
                    total_combinations,
                    ParameterSpace::describe_config(&config)
                );

                let mut engine = BacktestEngine::new((*loader).clone(), config.clone(), bt_config);

                match engine.run(start, end).await {
                    Ok(result) => {
                        info!(
                            "[{}/{}] Complete: Sharpe={:.3} Return={:.2}%",
                            i + 1,
                            total_combinations,
                            result.metrics.sharpe_ratio,
                            result.metrics.total_return_pct
                        );
                        Some((config, result))
                    }
                    Err(e) => {
                        warn!("[{}/{}] Failed: {:#}", i + 1, total_combinations, e);
                        None
                    }
                }
            });

            handles.push(handle);
        }

        let mut runs = Vec::new();
        let mut failed_runs = 0;

        for handle in handles {
            match handle.await {
                Ok(Some((config, result))) => runs.push((config, result)),
                Ok(None) => failed_runs += 1,
                Err(e) => {
                    warn!("Task panicked: {}", e);
                    failed_runs += 1;
                }
            }
        }

        let best_by_sharpe = runs
            .iter()
            .enumerate()
            .max_by_key(|(_, (_, result))| result.metrics.sharpe_ratio)
            .map(|(i, _)| i);

        let best_by_return = runs
            .iter()
            .enumerate()
            .max_by_key(|(_, (_, result))| result.metrics.total_return_pct)
            .map(|(i, _)| i);

        Ok(SweepResults {
            runs,
            best_by_sharpe,
            best_by_return,
            total_combinations,
            successful_runs: total_combinations - failed_runs,
            failed_runs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::CsvBarLoader;
    use crate::market::InstrumentSpec;

    #[test]
    fn test_parameter_space_count() {
        let space = ParameterSpace::default();
        assert_eq!(space.combination_count(), 3 * 3 * 3 * 3);
        assert_eq!(ParameterSpace::minimal().combination_count(), 1);
    }

    #[test]
    fn test_generate_configs() {
        let space = ParameterSpace {
            correlation_threshold: vec![dec!(0.8), dec!(0.9)],
            overlay_threshold: vec![dec!(100)],
            take_profit_points: vec![dec!(50)],
            max_open_pairs: vec![1, 3],
        };

        let configs = space.generate_configs(&Config::default());

        assert_eq!(configs.len(), 4);
        assert_eq!(configs[0].pairs.correlation_threshold, dec!(0.8));
        assert_eq!(configs[0].risk.max_open_pairs, 1);
        assert_eq!(configs[1].risk.max_open_pairs, 3);
        assert_eq!(configs[3].pairs.correlation_threshold, dec!(0.9));
        assert_eq!(configs[3].exit.take_profit_points, dec!(50));
    }

    #[test]
    fn test_describe_config() {
        let desc = ParameterSpace::describe_config(&Config::default());
        assert!(desc.contains("corr"));
        assert!(desc.contains("maxpairs=2"));
    }

    #[tokio::test]
    async fn test_sweep_counts_failed_configs() {
        let csv = "timestamp,symbol,open,high,low,close\n\
                   2024-01-01T00:00:00Z,AAA,1.0000,1.0005,0.9995,1.0000\n\
                   2024-01-01T00:00:00Z,BBB,2.0000,2.0010,1.9990,2.0000\n\
                   2024-01-02T00:00:00Z,AAA,1.0010,1.0015,1.0005,1.0010\n\
                   2024-01-02T00:00:00Z,BBB,2.0020,2.0030,2.0010,2.0020\n";
        let loader = CsvBarLoader::from_csv_content(csv).unwrap();

        let mut base = Config::default();
        base.universe.instruments = vec![
            InstrumentSpec::new("AAA", dec!(0.0001)),
            InstrumentSpec::new("BBB", dec!(0.0001)),
        ];
        base.risk.max_spread = Decimal::ZERO;

        // A threshold above 1 fails configuration validation
        let space = ParameterSpace {
            correlation_threshold: vec![dec!(0.9), dec!(1.5)],
            ..ParameterSpace::minimal()
        };
        let runner = SweepRunner::new(space, base, BacktestConfig::default(), 2);
        let (start, end) = loader.available_range().unwrap();
        let results = runner.run(loader, start, end).await.unwrap();

        assert_eq!(results.total_combinations, 2);
        assert_eq!(results.successful_runs, 1);
        assert_eq!(results.failed_runs, 1);
        let (config, result) = results.best_return().unwrap();
        assert_eq!(config.pairs.correlation_threshold, dec!(0.9));
        assert_eq!(result.snapshots_processed, 2);
        assert!(results.summary().contains("Failed: 1"));
    }
}
