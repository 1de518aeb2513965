//! Pair qualification: correlation, volatility ratio, and the qualifying-pair index.

use super::ledger::HedgeLedger;
use crate::market::InstrumentId;
use crate::stats::{InstrumentStats, RollingWindow};
use crate::utils::from_count;
use rust_decimal::{Decimal, MathematicalOps};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

/// Unordered pair of distinct instruments, stored as `(lower, higher)`.
///
/// The lower id is the pair's main leg and the higher id its sub leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PairKey(InstrumentId, InstrumentId);

impl PairKey {
    /// Build a canonical key, or `None` if both ids are the same.
    pub fn new(a: InstrumentId, b: InstrumentId) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self(a, b)),
            std::cmp::Ordering::Greater => Some(Self(b, a)),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn main(&self) -> InstrumentId {
        self.0
    }

    pub fn sub(&self) -> InstrumentId {
        self.1
    }

    pub fn contains(&self, id: InstrumentId) -> bool {
        self.0 == id || self.1 == id
    }

    /// The other leg of the pair, if `id` is one of its legs.
    pub fn partner(&self, id: InstrumentId) -> Option<InstrumentId> {
        if self.0 == id {
            Some(self.1)
        } else if self.1 == id {
            Some(self.0)
        } else {
            None
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0, self.1)
    }
}

/// Pearson correlation of the most recent paired samples of two windows.
///
/// Uses `min(lookback, count_a, count_b)` samples (`lookback == 0` means all
/// available). Fewer than two samples, non-positive variance, or arithmetic
/// overflow all yield zero.
pub fn correlation(a: &RollingWindow, b: &RollingWindow, lookback: usize) -> Decimal {
    let available = a.count().min(b.count());
    let n = if lookback == 0 {
        available
    } else {
        lookback.min(available)
    };
    if n < 2 {
        return Decimal::ZERO;
    }
    pearson(a.recent(n), b.recent(n), n).unwrap_or(Decimal::ZERO)
}

fn pearson<A, B>(xs: A, ys: B, n: usize) -> Option<Decimal>
where
    A: Iterator<Item = Decimal>,
    B: Iterator<Item = Decimal>,
{
    let mut sum_x = Decimal::ZERO;
    let mut sum_y = Decimal::ZERO;
    let mut sum_xy = Decimal::ZERO;
    let mut sum_x2 = Decimal::ZERO;
    let mut sum_y2 = Decimal::ZERO;

    for (x, y) in xs.zip(ys) {
        sum_x = sum_x.checked_add(x)?;
        sum_y = sum_y.checked_add(y)?;
        sum_xy = sum_xy.checked_add(x.checked_mul(y)?)?;
        sum_x2 = sum_x2.checked_add(x.checked_mul(x)?)?;
        sum_y2 = sum_y2.checked_add(y.checked_mul(y)?)?;
    }

    let n = from_count(n);
    let numerator = n
        .checked_mul(sum_xy)?
        .checked_sub(sum_x.checked_mul(sum_y)?)?;
    let var_x = n
        .checked_mul(sum_x2)?
        .checked_sub(sum_x.checked_mul(sum_x)?)?;
    let var_y = n
        .checked_mul(sum_y2)?
        .checked_sub(sum_y.checked_mul(sum_y)?)?;

    if var_x <= Decimal::ZERO || var_y <= Decimal::ZERO {
        return Some(Decimal::ZERO);
    }

    let denominator = var_x.sqrt()?.checked_mul(var_y.sqrt()?)?;
    if denominator.is_zero() {
        return Some(Decimal::ZERO);
    }

    let r = numerator.checked_div(denominator)?;
    // Rounding in the square roots can push |r| a hair past 1.
    Some(r.max(Decimal::NEGATIVE_ONE).min(Decimal::ONE))
}

/// `ATR(sub) / ATR(main)` over the most recent shared true-range samples.
///
/// Returns zero when no samples resolve or either ATR is non-positive.
pub fn volatility_ratio(main: &InstrumentStats, sub: &InstrumentStats, atr_lookback: usize) -> Decimal {
    let available = main
        .true_ranges()
        .count()
        .min(sub.true_ranges().count());
    let n = if atr_lookback == 0 {
        available
    } else {
        atr_lookback.min(available)
    };
    if n == 0 {
        return Decimal::ZERO;
    }

    let atr_main = main.atr(n);
    let atr_sub = sub.atr(n);
    if atr_main <= Decimal::ZERO || atr_sub <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    atr_sub.checked_div(atr_main).unwrap_or(Decimal::ZERO)
}

/// Settings consumed by [`PairCatalog::recalculate`].
#[derive(Debug, Clone, Copy)]
pub struct QualificationRules {
    pub correlation_lookback: usize,
    pub atr_lookback: usize,
    pub correlation_threshold: Decimal,
}

/// Outcome of one recalculation cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecalcSummary {
    /// Pairs where both sides had enough data to correlate
    pub evaluated: usize,
    /// Pairs that met the correlation and volatility criteria
    pub qualified: usize,
    /// Stale closed hedge states removed
    pub pruned: usize,
}

/// Per-instrument index of the currently qualifying pairs.
#[derive(Debug, Clone)]
pub struct PairCatalog {
    rules: QualificationRules,
    by_instrument: Vec<Vec<PairKey>>,
}

impl PairCatalog {
    pub fn new(instrument_count: usize, rules: QualificationRules) -> Self {
        Self {
            rules,
            by_instrument: vec![Vec::new(); instrument_count],
        }
    }

    /// Qualifying pairs touching `id`, in the order they were recorded.
    pub fn pairs_for(&self, id: InstrumentId) -> &[PairKey] {
        self.by_instrument
            .get(id.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether `key` qualified in the last recalculation.
    pub fn is_qualifying(&self, key: &PairKey) -> bool {
        self.pairs_for(key.main()).contains(key)
    }

    /// All qualifying pairs, each listed once.
    pub fn qualifying_pairs(&self) -> Vec<PairKey> {
        self.by_instrument
            .iter()
            .enumerate()
            .flat_map(|(idx, pairs)| {
                pairs
                    .iter()
                    .filter(move |key| key.main().index() == idx)
                    .copied()
            })
            .collect()
    }

    /// Re-evaluate every instrument pair and refresh the ledger.
    pub fn recalculate(&mut self, stats: &[InstrumentStats], ledger: &mut HedgeLedger) -> RecalcSummary {
        let rules = self.rules;
        let mut summary = RecalcSummary::default();
        self.clear();

        for i in 0..stats.len() {
            if !stats[i].has_correlation_data(rules.correlation_lookback) {
                continue;
            }
            for j in (i + 1)..stats.len() {
                if !stats[j].has_correlation_data(rules.correlation_lookback) {
                    continue;
                }
                let Some(key) = PairKey::new(InstrumentId(i), InstrumentId(j)) else {
                    continue;
                };
                summary.evaluated += 1;

                let r = correlation(stats[i].closes(), stats[j].closes(), rules.correlation_lookback);
                if r.abs() < rules.correlation_threshold {
                    debug!(pair = %key, correlation = %r, "Pair below correlation threshold");
                    continue;
                }

                let ratio = volatility_ratio(&stats[i], &stats[j], rules.atr_lookback);
                if ratio <= Decimal::ZERO {
                    debug!(pair = %key, correlation = %r, "Pair has no usable volatility ratio");
                    continue;
                }

                ledger.upsert_qualified(key, r, ratio);
                self.by_instrument[i].push(key);
                self.by_instrument[j].push(key);
                summary.qualified += 1;
            }
        }

        summary.pruned = ledger.prune(|key| self.is_qualifying(key));

        info!(
            evaluated = summary.evaluated,
            qualified = summary.qualified,
            pruned = summary.pruned,
            "Pair recalculation complete"
        );
        summary
    }

    /// Drop every recorded pair.
    pub fn clear(&mut self) {
        for pairs in &mut self.by_instrument {
            pairs.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatsLookbacks;
    use rust_decimal_macros::dec;

    fn window_of(values: impl IntoIterator<Item = Decimal>, capacity: usize) -> RollingWindow {
        let mut w = RollingWindow::new(capacity);
        for v in values {
            w.add(v);
        }
        w
    }

    fn close_enough(a: Decimal, b: Decimal) -> bool {
        (a - b).abs() < dec!(0.000001)
    }

    fn lookbacks() -> StatsLookbacks {
        StatsLookbacks {
            correlation: 500,
            range: 20,
            atr: 14,
        }
    }

    /// Stats fed with bars whose close follows `closes` and whose span is `span`.
    fn stats_with(closes: &[Decimal], span: Decimal) -> InstrumentStats {
        let mut s = InstrumentStats::new(lookbacks());
        for &c in closes {
            s.update(c, c + span / dec!(2), c - span / dec!(2), c);
        }
        s
    }

    #[test]
    fn test_pair_key_is_order_independent() {
        let a = PairKey::new(InstrumentId(3), InstrumentId(1)).unwrap();
        let b = PairKey::new(InstrumentId(1), InstrumentId(3)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.main(), InstrumentId(1));
        assert_eq!(a.sub(), InstrumentId(3));
        assert_eq!(a.partner(InstrumentId(3)), Some(InstrumentId(1)));
        assert_eq!(a.partner(InstrumentId(2)), None);
        assert!(PairKey::new(InstrumentId(2), InstrumentId(2)).is_none());
    }

    #[test]
    fn test_self_correlation_is_one() {
        let values: Vec<Decimal> = [1, 3, 2, 5, 4, 7, 6].iter().map(|&v| Decimal::from(v)).collect();
        let a = window_of(values.clone(), 10);
        let b = window_of(values, 10);
        assert!(close_enough(correlation(&a, &b, 0), Decimal::ONE));
    }

    #[test]
    fn test_negated_series_correlation_is_minus_one() {
        let values: Vec<Decimal> = [1, 3, 2, 5, 4, 7, 6].iter().map(|&v| Decimal::from(v)).collect();
        let a = window_of(values.clone(), 10);
        let b = window_of(values.into_iter().map(|v| -v), 10);
        assert!(close_enough(correlation(&a, &b, 0), Decimal::NEGATIVE_ONE));
    }

    #[test]
    fn test_constant_series_correlation_is_zero() {
        let a = window_of((1..=10).map(Decimal::from), 10);
        let b = window_of(std::iter::repeat(dec!(1.2345)).take(10), 10);
        assert_eq!(correlation(&a, &b, 0), Decimal::ZERO);
        assert_eq!(correlation(&b, &a, 5), Decimal::ZERO);
    }

    #[test]
    fn test_correlation_needs_two_samples() {
        let a = window_of(vec![dec!(1)], 10);
        let b = window_of(vec![dec!(2), dec!(3)], 10);
        assert_eq!(correlation(&a, &b, 0), Decimal::ZERO);
    }

    #[test]
    fn test_correlation_uses_most_recent_lookback() {
        // First half anti-correlated, last five perfectly correlated
        let a = window_of([5, 4, 3, 2, 1, 1, 2, 3, 4, 5].iter().map(|&v| Decimal::from(v)), 10);
        let b = window_of([1, 2, 3, 4, 5, 2, 4, 6, 8, 10].iter().map(|&v| Decimal::from(v)), 10);
        assert!(close_enough(correlation(&a, &b, 5), Decimal::ONE));
        assert!(correlation(&a, &b, 10) < dec!(0.9));
    }

    #[test]
    fn test_volatility_ratio() {
        let closes: Vec<Decimal> = (0..20).map(|i| dec!(1.1) + Decimal::from(i) * dec!(0.001)).collect();
        let main = stats_with(&closes, dec!(0.002));
        let sub = stats_with(&closes, dec!(0.004));

        let ratio = volatility_ratio(&main, &sub, 14);
        assert!(ratio > Decimal::ZERO);
        // Sub is twice as volatile in span; the close gaps are smaller than both spans
        assert_eq!(ratio, dec!(2));
    }

    #[test]
    fn test_volatility_ratio_zero_when_flat() {
        let flat = stats_with(&[dec!(1); 10], Decimal::ZERO);
        let moving = stats_with(&[dec!(1), dec!(2), dec!(3)], dec!(0.5));
        assert_eq!(volatility_ratio(&flat, &moving, 14), Decimal::ZERO);
        assert_eq!(volatility_ratio(&moving, &flat, 14), Decimal::ZERO);

        let empty = InstrumentStats::new(lookbacks());
        assert_eq!(volatility_ratio(&empty, &moving, 0), Decimal::ZERO);
    }

    #[test]
    fn test_recalculate_qualifies_linear_series() {
        // Two strictly increasing series of slope 1 over 500 bars
        let closes: Vec<Decimal> = (1..=500).map(Decimal::from).collect();
        let stats = vec![stats_with(&closes, dec!(2)), stats_with(&closes, dec!(2))];

        let mut catalog = PairCatalog::new(
            2,
            QualificationRules {
                correlation_lookback: 500,
                atr_lookback: 14,
                correlation_threshold: dec!(0.9),
            },
        );
        let mut ledger = HedgeLedger::new();

        let summary = catalog.recalculate(&stats, &mut ledger);
        assert_eq!(summary.evaluated, 1);
        assert_eq!(summary.qualified, 1);

        let key = PairKey::new(InstrumentId(0), InstrumentId(1)).unwrap();
        let state = ledger.get(&key).unwrap();
        assert!(state.is_positive);
        assert!(close_enough(state.correlation, Decimal::ONE));
        assert_eq!(state.scale, Decimal::ONE);
        assert_eq!(catalog.pairs_for(InstrumentId(0)), &[key]);
        assert_eq!(catalog.pairs_for(InstrumentId(1)), &[key]);
        assert_eq!(catalog.qualifying_pairs(), vec![key]);
    }

    #[test]
    fn test_recalculate_skips_insufficient_and_prunes_stale() {
        let closes: Vec<Decimal> = (1..=50).map(Decimal::from).collect();
        let mut stats = vec![
            stats_with(&closes, dec!(2)),
            stats_with(&closes, dec!(2)),
            stats_with(&closes[..10], dec!(2)),
        ];
        let rules = QualificationRules {
            correlation_lookback: 40,
            atr_lookback: 14,
            correlation_threshold: dec!(0.9),
        };
        let mut catalog = PairCatalog::new(3, rules);
        let mut ledger = HedgeLedger::new();

        let summary = catalog.recalculate(&stats, &mut ledger);
        // Instrument 2 lacks data, so only (0, 1) is evaluated
        assert_eq!(summary.evaluated, 1);
        assert_eq!(ledger.len(), 1);

        // Break the correlation of instrument 1 by flattening it
        stats[1] = stats_with(&[dec!(7); 50], dec!(2));
        let summary = catalog.recalculate(&stats, &mut ledger);
        assert_eq!(summary.qualified, 0);
        assert_eq!(summary.pruned, 1);
        assert!(ledger.is_empty());
        assert!(catalog.pairs_for(InstrumentId(0)).is_empty());
    }
}
