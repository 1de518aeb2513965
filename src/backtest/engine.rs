//! Backtesting simulation engine.
//!
//! Replays historical bars through a hedge session backed by the paper venue.

use crate::backtest::metrics::{BacktestMetrics, EquityPoint};
use crate::backtest::{BacktestConfig, DataLoader, MarketSnapshot};
use crate::config::Config;
use crate::execution::PaperVenue;
use crate::market::{Bar, MarketEvent, Quote};
use crate::persistence::HedgeJournal;
use crate::session::{HedgeSession, SessionStats};
use crate::strategy::{HedgeClosed, HedgeEngine};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Complete result of a backtest run.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub config: Config,
    pub metrics: BacktestMetrics,
    pub equity_curve: Vec<EquityPoint>,
    pub closed_hedges: Vec<HedgeClosed>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub snapshots_processed: usize,
    /// Rows whose symbol is not in the configured universe
    pub skipped_rows: usize,
    #[serde(skip)]
    pub session_stats: SessionStats,
}

impl BacktestResult {
    /// Export equity curve to CSV.
    pub fn equity_to_csv(&self, path: &str) -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "timestamp,balance,unrealized_pnl,total_equity,drawdown,open_hedges")?;

        for point in &self.equity_curve {
            writeln!(
                file,
                "{},{},{},{},{},{}",
                point.timestamp.to_rfc3339(),
                point.balance,
                point.unrealized_pnl,
                point.total_equity,
                point.drawdown,
                point.open_hedges,
            )?;
        }

        Ok(())
    }

    pub fn summary(&self) -> String {
        format!(
            "{}\n\nBacktest Period: {} to {}\nSnapshots: {}\nSkipped Rows: {}",
            self.metrics.summary(),
            self.start_time.format("%Y-%m-%d"),
            self.end_time.format("%Y-%m-%d"),
            self.snapshots_processed,
            self.skipped_rows,
        )
    }
}

/// The backtesting simulation engine.
pub struct BacktestEngine<D: DataLoader> {
    data_loader: D,
    config: Config,
    backtest_config: BacktestConfig,
}

impl<D: DataLoader> BacktestEngine<D> {
    pub fn new(data_loader: D, config: Config, backtest_config: BacktestConfig) -> Self {
        Self {
            data_loader,
            config,
            backtest_config,
        }
    }

    /// Run the backtest over snapshots between `start` and `end`.
    ///
    /// Every run starts from a fresh engine and paper account, so the same
    /// data always yields the same result.
    pub async fn run(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<BacktestResult> {
        info!(
            "Starting backtest from {} to {}",
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M")
        );

        let snapshots = self.data_loader.load_snapshots(start, end)?;
        if snapshots.is_empty() {
            anyhow::bail!("No data available for the specified time range");
        }
        info!("Loaded {} snapshots", snapshots.len());

        let has_quotes = snapshots
            .iter()
            .flat_map(|s| &s.bars)
            .any(|b| b.has_quote());
        if !has_quotes && self.config.risk.max_spread > Decimal::ZERO {
            warn!(
                max_spread = %self.config.risk.max_spread,
                "Data has no bid/ask columns; every open will fail the spread filter"
            );
        }

        let engine = HedgeEngine::new(self.config.clone())?;
        let venue = Arc::new(PaperVenue::new(
            &self.config.universe.instruments,
            &self.config.paper,
        ));
        let mut session = HedgeSession::new(engine, Arc::clone(&venue));
        if let Some(path) = &self.backtest_config.journal_path {
            let journal = HedgeJournal::new(path)?;
            journal.clear_all()?;
            session = session.with_journal(journal);
        }

        let initial_balance = self.config.paper.initial_balance;
        let mut peak_equity = initial_balance;
        let mut equity_curve = Vec::new();
        let mut closed_hedges = Vec::new();
        let mut skipped_rows = 0;

        for (i, snapshot) in snapshots.iter().enumerate() {
            skipped_rows += self.step(&mut session, snapshot, &mut closed_hedges).await?;

            let account = venue.account().await;
            let open_hedges = session.engine().open_count();
            if self.backtest_config.record_equity_curve {
                equity_curve.push(EquityPoint::new(
                    snapshot.timestamp,
                    account.balance,
                    account.unrealized_pnl,
                    open_hedges,
                    peak_equity,
                ));
            }
            if account.equity > peak_equity {
                peak_equity = account.equity;
            }
            if let Some(journal) = session.journal() {
                journal.record_equity(snapshot.timestamp, account.balance, account.equity, open_hedges)?;
            }

            if i % 100 == 0 {
                debug!(
                    "Progress: {}/{} ({:.1}%), Equity: {:.2}",
                    i,
                    snapshots.len(),
                    (i as f64 / snapshots.len() as f64) * 100.0,
                    account.equity
                );
            }
        }

        if skipped_rows > 0 {
            warn!(skipped_rows, "Rows for instruments outside the universe were ignored");
        }

        let account = venue.account().await;
        let stats = session.stats().clone();
        let metrics = BacktestMetrics::calculate(
            &equity_curve,
            initial_balance,
            &closed_hedges,
            &account,
            &stats,
        );

        info!(
            equity = %account.equity,
            opened = stats.hedges_opened,
            closed = stats.hedges_closed,
            "Backtest complete"
        );

        Ok(BacktestResult {
            config: self.config.clone(),
            metrics,
            equity_curve,
            closed_hedges,
            start_time: start,
            end_time: end,
            snapshots_processed: snapshots.len(),
            skipped_rows,
            session_stats: stats,
        })
    }

    /// Feed one snapshot's rows to the session; returns the skipped row count.
    async fn step(
        &self,
        session: &mut HedgeSession<PaperVenue>,
        snapshot: &MarketSnapshot,
        closed_hedges: &mut Vec<HedgeClosed>,
    ) -> Result<usize> {
        let mut skipped = 0;
        for record in &snapshot.bars {
            let Some(instrument) = session.engine().universe().id_of(&record.symbol) else {
                skipped += 1;
                continue;
            };

            if record.has_quote() {
                session
                    .handle(MarketEvent::Quote(Quote {
                        instrument,
                        bid: record.bid,
                        ask: record.ask,
                    }))
                    .await?;
            }

            let outcome = session
                .handle(MarketEvent::Bar(Bar {
                    instrument,
                    open_time: record.timestamp,
                    open: record.open,
                    high: record.high,
                    low: record.low,
                    close: record.close,
                }))
                .await?;
            if let Some(outcome) = outcome {
                closed_hedges.extend(outcome.closed);
            }
        }
        Ok(skipped)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_loader(&self) -> &D {
        &self.data_loader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::CsvBarLoader;
    use crate::market::InstrumentSpec;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use std::fmt::Write;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.universe.instruments = vec![
            InstrumentSpec::new("AAA", dec!(0.0001)).with_volume_limits(dec!(0.01), dec!(100), dec!(0.01)),
            InstrumentSpec::new("BBB", dec!(0.0001)).with_volume_limits(dec!(0.01), dec!(100), dec!(0.01)),
        ];
        config.pairs.correlation_lookback = 20;
        config.pairs.range_lookback = 20;
        config.pairs.atr_lookback = 14;
        config.pairs.recalc_hour = 0;
        config.risk.max_spread = Decimal::ZERO;
        config.sizing.base_volume = dec!(1);
        config
    }

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    fn row(out: &mut String, n: i64, symbol: &str, open: Decimal, high: Decimal, low: Decimal, close: Decimal) {
        writeln!(out, "{},{},{},{},{},{}", day(n).to_rfc3339(), symbol, open, high, low, close).unwrap();
    }

    fn trend_row(out: &mut String, k: u64, symbol: &str, n: i64) {
        let close = Decimal::from(k + 1) * (dec!(1.0000) + dec!(0.0010) * Decimal::from(n));
        let half_span = Decimal::from(k + 1) * dec!(0.0005);
        row(out, n, symbol, close, close + half_span, close - half_span, close);
    }

    /// Two steadily trending instruments, then a sharp drop in AAA after the
    /// daily recalculation has qualified the pair.
    fn diverging_csv() -> String {
        let mut csv = String::from("timestamp,symbol,open,high,low,close\n");
        for n in 0..26 {
            trend_row(&mut csv, 0, "AAA", n);
            trend_row(&mut csv, 1, "BBB", n);
            row(&mut csv, n, "ZZZ", dec!(1), dec!(1), dec!(1), dec!(1));
        }
        trend_row(&mut csv, 1, "BBB", 26);
        row(&mut csv, 26, "AAA", dec!(1.0250), dec!(1.0250), dec!(1.0045), dec!(1.0050));
        csv
    }

    fn backtest(config: Config) -> BacktestEngine<CsvBarLoader> {
        let loader = CsvBarLoader::from_csv_content(&diverging_csv()).unwrap();
        BacktestEngine::new(loader, config, BacktestConfig::default())
    }

    #[tokio::test]
    async fn test_backtest_opens_hedge_on_divergence() {
        let mut engine = backtest(test_config());
        let result = engine.run(day(0), day(30)).await.unwrap();

        assert_eq!(result.snapshots_processed, 27);
        assert_eq!(result.equity_curve.len(), 27);
        assert_eq!(result.skipped_rows, 26);
        assert_eq!(result.metrics.hedges_opened, 1);
        assert_eq!(result.metrics.fills, 2);
        assert_eq!(result.metrics.rejections, 0);
        assert_eq!(result.equity_curve.last().unwrap().open_hedges, 1);
        assert!(result.closed_hedges.is_empty());
        // Legs fill at the marks they are valued at
        assert_eq!(result.metrics.final_equity, dec!(10000));
    }

    #[tokio::test]
    async fn test_backtest_is_repeatable() {
        let mut engine = backtest(test_config());
        let first = engine.run(day(0), day(30)).await.unwrap();
        let second = engine.run(day(0), day(30)).await.unwrap();

        assert_eq!(first.metrics, second.metrics);
        assert_eq!(first.equity_curve, second.equity_curve);
    }

    #[tokio::test]
    async fn test_spread_filter_without_quotes_blocks_opens() {
        let mut config = test_config();
        config.risk.max_spread = dec!(10);
        let mut engine = backtest(config);
        let result = engine.run(day(0), day(30)).await.unwrap();

        assert_eq!(result.metrics.hedges_opened, 0);
        assert_eq!(result.metrics.fills, 0);
    }

    #[tokio::test]
    async fn test_empty_range_fails() {
        let mut engine = backtest(test_config());
        assert!(engine.run(day(100), day(200)).await.is_err());
    }

    #[tokio::test]
    async fn test_journal_receives_equity_snapshots() {
        let path = std::env::temp_dir().join(format!("hedger-backtest-{}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let loader = CsvBarLoader::from_csv_content(&diverging_csv()).unwrap();
        let backtest_config = BacktestConfig {
            journal_path: Some(path.to_string_lossy().to_string()),
            ..Default::default()
        };
        let mut engine = BacktestEngine::new(loader, test_config(), backtest_config);
        engine.run(day(0), day(30)).await.unwrap();

        let journal = HedgeJournal::new(&path).unwrap();
        let summary = journal.summary().unwrap();
        assert_eq!(summary.opened, 1);
        assert_eq!(summary.last_equity, Some(dec!(10000)));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_equity_csv_export() {
        let result = BacktestResult {
            config: test_config(),
            metrics: BacktestMetrics::default(),
            equity_curve: vec![EquityPoint::new(day(0), dec!(10000), dec!(5), 1, dec!(10000))],
            closed_hedges: Vec::new(),
            start_time: day(0),
            end_time: day(1),
            snapshots_processed: 1,
            skipped_rows: 0,
            session_stats: SessionStats::default(),
        };

        let path = std::env::temp_dir().join(format!("hedger-equity-{}.csv", std::process::id()));
        result.equity_to_csv(path.to_str().unwrap()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert!(content.starts_with("timestamp,balance"));
        assert!(content.contains("10000,5,10005,0,1"));
        assert!(result.summary().contains("Snapshots: 1"));
    }
}
