//! Performance metrics for hedge backtests.

use crate::execution::PaperAccount;
use crate::session::SessionStats;
use crate::strategy::HedgeClosed;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A point on the equity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub balance: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_equity: Decimal,
    pub drawdown: Decimal,
    pub open_hedges: usize,
}

impl EquityPoint {
    pub fn new(
        timestamp: DateTime<Utc>,
        balance: Decimal,
        unrealized_pnl: Decimal,
        open_hedges: usize,
        peak_equity: Decimal,
    ) -> Self {
        let total_equity = balance + unrealized_pnl;
        let drawdown = if peak_equity > Decimal::ZERO && total_equity < peak_equity {
            (peak_equity - total_equity) / peak_equity
        } else {
            Decimal::ZERO
        };

        Self {
            timestamp,
            balance,
            unrealized_pnl,
            total_equity,
            drawdown,
            open_hedges,
        }
    }
}

/// Backtest performance summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    // Returns
    pub final_equity: Decimal,
    pub total_return: Decimal,
    pub total_return_pct: Decimal,
    pub realized_pnl: Decimal,
    pub commission_paid: Decimal,

    // Risk
    /// Maximum peak-to-trough drawdown as a fraction
    pub max_drawdown: Decimal,
    pub max_drawdown_duration_hours: i64,
    /// Sharpe ratio per equity step, annualized (zero risk-free rate)
    pub sharpe_ratio: Decimal,

    // Hedges
    pub hedges_opened: u64,
    pub hedges_closed: u64,
    pub winning_hedges: u64,
    /// Winning closed hedges as a percentage
    pub win_rate: Decimal,
    /// Sum of points captured by closed hedges
    pub total_points: Decimal,
    pub avg_points_per_hedge: Decimal,
    pub avg_hold_hours: f64,

    // Activity
    pub bars_processed: u64,
    pub recalculations: u64,
    pub fills: u64,
    pub rejections: u64,
    pub duration_days: f64,
}

impl BacktestMetrics {
    pub fn calculate(
        equity_curve: &[EquityPoint],
        initial_balance: Decimal,
        closed: &[HedgeClosed],
        account: &PaperAccount,
        session: &SessionStats,
    ) -> Self {
        let duration_days = match (equity_curve.first(), equity_curve.last()) {
            (Some(first), Some(last)) => {
                (last.timestamp - first.timestamp).num_seconds() as f64 / 86400.0
            }
            _ => 0.0,
        };

        let total_return = account.equity - initial_balance;
        let total_return_pct = if initial_balance > Decimal::ZERO {
            total_return / initial_balance * dec!(100)
        } else {
            Decimal::ZERO
        };

        let (max_drawdown, max_drawdown_duration_hours) = calculate_max_drawdown(equity_curve);
        let returns = calculate_period_returns(equity_curve);
        let sharpe_ratio = calculate_sharpe(&returns, duration_days / 365.0);

        let hedges_closed = closed.len() as u64;
        let winning_hedges = closed
            .iter()
            .filter(|c| c.pnl.currency > Decimal::ZERO)
            .count() as u64;
        let total_points: Decimal = closed.iter().map(|c| c.pnl.points).sum();

        let hold_hours: Vec<f64> = closed
            .iter()
            .filter_map(|c| c.opened_at.map(|opened| (c.at - opened).num_minutes() as f64 / 60.0))
            .collect();
        let avg_hold_hours = if hold_hours.is_empty() {
            0.0
        } else {
            hold_hours.iter().sum::<f64>() / hold_hours.len() as f64
        };

        let (win_rate, avg_points_per_hedge) = if hedges_closed > 0 {
            (
                Decimal::from(winning_hedges) / Decimal::from(hedges_closed) * dec!(100),
                total_points / Decimal::from(hedges_closed),
            )
        } else {
            (Decimal::ZERO, Decimal::ZERO)
        };

        Self {
            final_equity: account.equity,
            total_return,
            total_return_pct,
            realized_pnl: account.realized_pnl,
            commission_paid: account.commission_paid,
            max_drawdown,
            max_drawdown_duration_hours,
            sharpe_ratio,
            hedges_opened: session.hedges_opened,
            hedges_closed,
            winning_hedges,
            win_rate,
            total_points,
            avg_points_per_hedge,
            avg_hold_hours,
            bars_processed: session.bars,
            recalculations: session.recalculations,
            fills: session.fills,
            rejections: session.rejections,
            duration_days,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            r#"═══════════════════════════════════════════════
BACKTEST RESULTS ({:.1} days)
═══════════════════════════════════════════════
RETURNS
  Final Equity:      {:.2}
  Total Return:      {:.2} ({:.2}%)
  Realized PnL:      {:.2}
  Commission:        {:.2}

RISK
  Max Drawdown:      {:.2}%
  Sharpe Ratio:      {:.3}

HEDGES
  Opened:            {}
  Closed:            {}
  Win Rate:          {:.1}%
  Points Captured:   {:.1}
  Avg Hold:          {:.1}h

ACTIVITY
  Bars:              {}
  Recalculations:    {}
  Fills:             {}
  Rejections:        {}
═══════════════════════════════════════════════"#,
            self.duration_days,
            self.final_equity,
            self.total_return,
            self.total_return_pct,
            self.realized_pnl,
            self.commission_paid,
            self.max_drawdown * dec!(100),
            self.sharpe_ratio,
            self.hedges_opened,
            self.hedges_closed,
            self.win_rate,
            self.total_points,
            self.avg_hold_hours,
            self.bars_processed,
            self.recalculations,
            self.fills,
            self.rejections,
        )
    }
}

fn calculate_period_returns(equity_curve: &[EquityPoint]) -> Vec<Decimal> {
    equity_curve
        .windows(2)
        .map(|w| {
            let (prev, curr) = (&w[0], &w[1]);
            if prev.total_equity > Decimal::ZERO {
                (curr.total_equity - prev.total_equity) / prev.total_equity
            } else {
                Decimal::ZERO
            }
        })
        .collect()
}

/// Maximum drawdown fraction and the longest time spent below a peak, in hours.
fn calculate_max_drawdown(equity_curve: &[EquityPoint]) -> (Decimal, i64) {
    let Some(first) = equity_curve.first() else {
        return (Decimal::ZERO, 0);
    };

    let mut peak = first.total_equity;
    let mut peak_time = first.timestamp;
    let mut max_dd = Decimal::ZERO;
    let mut max_duration = 0;

    for point in equity_curve {
        if point.total_equity >= peak {
            peak = point.total_equity;
            peak_time = point.timestamp;
            continue;
        }
        if peak > Decimal::ZERO {
            let dd = (peak - point.total_equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
        max_duration = max_duration.max((point.timestamp - peak_time).num_hours());
    }

    (max_dd, max_duration)
}

fn calculate_sharpe(returns: &[Decimal], duration_years: f64) -> Decimal {
    if returns.len() < 2 || duration_years <= 0.0 {
        return Decimal::ZERO;
    }

    let returns: Vec<f64> = returns.iter().filter_map(|r| r.to_f64()).collect();
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    if std_dev < 1e-12 {
        return Decimal::ZERO;
    }

    let periods_per_year = n / duration_years;
    let sharpe = (mean * periods_per_year) / (std_dev * periods_per_year.sqrt());
    Decimal::from_f64_retain(sharpe).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::InstrumentId;
    use crate::strategy::{HedgeAction, HedgePnl, PairKey};
    use chrono::{Duration, TimeZone};

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    fn point(n: i64, equity: Decimal) -> EquityPoint {
        EquityPoint::new(day(n), equity, Decimal::ZERO, 0, equity)
    }

    fn closed(currency: Decimal, hours: i64) -> HedgeClosed {
        HedgeClosed {
            key: PairKey::new(InstrumentId(0), InstrumentId(1)).unwrap(),
            main_symbol: "EURUSD".to_string(),
            sub_symbol: "GBPUSD".to_string(),
            action: HedgeAction::BuyBoth,
            pnl: HedgePnl {
                points: currency,
                currency,
            },
            opened_at: Some(day(0)),
            at: day(0) + Duration::hours(hours),
        }
    }

    fn account(equity: Decimal) -> PaperAccount {
        PaperAccount {
            initial_balance: dec!(10000),
            balance: equity,
            unrealized_pnl: Decimal::ZERO,
            equity,
            realized_pnl: equity - dec!(10000),
            commission_paid: Decimal::ZERO,
            order_count: 0,
            positions: Vec::new(),
        }
    }

    #[test]
    fn test_equity_point_drawdown() {
        let point = EquityPoint::new(Utc::now(), dec!(9500), dec!(0), 2, dec!(10000));
        assert_eq!(point.total_equity, dec!(9500));
        assert_eq!(point.drawdown, dec!(0.05));

        let above_peak = EquityPoint::new(Utc::now(), dec!(10100), dec!(0), 0, dec!(10000));
        assert_eq!(above_peak.drawdown, Decimal::ZERO);
    }

    #[test]
    fn test_max_drawdown_calculation() {
        let curve = vec![
            point(0, dec!(10000)),
            point(1, dec!(10500)),
            point(2, dec!(9450)),
            point(3, dec!(10000)),
            point(4, dec!(11000)),
        ];

        let (max_dd, duration) = calculate_max_drawdown(&curve);
        // 10500 -> 9450
        assert_eq!(max_dd, dec!(0.1));
        assert_eq!(duration, 48);
    }

    #[test]
    fn test_period_returns() {
        let curve = vec![point(0, dec!(10000)), point(1, dec!(10100)), point(2, dec!(10100))];
        let returns = calculate_period_returns(&curve);
        assert_eq!(returns, vec![dec!(0.01), Decimal::ZERO]);
    }

    #[test]
    fn test_hedge_statistics() {
        let curve = vec![point(0, dec!(10000)), point(10, dec!(10090))];
        let hedges = vec![closed(dec!(120), 6), closed(dec!(-30), 18)];
        let session = SessionStats {
            bars: 500,
            hedges_opened: 3,
            hedges_closed: 2,
            ..Default::default()
        };

        let metrics =
            BacktestMetrics::calculate(&curve, dec!(10000), &hedges, &account(dec!(10090)), &session);

        assert_eq!(metrics.total_return, dec!(90));
        assert_eq!(metrics.total_return_pct, dec!(0.9));
        assert_eq!(metrics.hedges_opened, 3);
        assert_eq!(metrics.hedges_closed, 2);
        assert_eq!(metrics.winning_hedges, 1);
        assert_eq!(metrics.win_rate, dec!(50));
        assert_eq!(metrics.total_points, dec!(90));
        assert_eq!(metrics.avg_points_per_hedge, dec!(45));
        assert!((metrics.avg_hold_hours - 12.0).abs() < 1e-9);
        assert!((metrics.duration_days - 10.0).abs() < 1e-9);
        assert_eq!(metrics.bars_processed, 500);
    }

    #[test]
    fn test_empty_run() {
        let metrics = BacktestMetrics::calculate(
            &[],
            dec!(10000),
            &[],
            &account(dec!(10000)),
            &SessionStats::default(),
        );
        assert_eq!(metrics.total_return, Decimal::ZERO);
        assert_eq!(metrics.win_rate, Decimal::ZERO);
        assert_eq!(metrics.sharpe_ratio, Decimal::ZERO);
    }

    #[test]
    fn test_metrics_summary() {
        let metrics = BacktestMetrics {
            final_equity: dec!(10500),
            total_return: dec!(500),
            hedges_opened: 10,
            ..Default::default()
        };
        let summary = metrics.summary();
        assert!(summary.contains("500.00"));
        assert!(summary.contains("Win Rate"));
    }
}
