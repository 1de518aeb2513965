//! Per-instrument rolling statistics.

use super::RollingWindow;
use rust_decimal::Decimal;

/// Window sizes used to build [`InstrumentStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsLookbacks {
    /// Close samples kept for correlation (minimum window of 2)
    pub correlation: usize,
    /// High/low samples kept for the overlay range
    pub range: usize,
    /// True-range samples kept for ATR
    pub atr: usize,
}

/// Rolling price state for one instrument.
#[derive(Debug, Clone)]
pub struct InstrumentStats {
    closes: RollingWindow,
    highs: RollingWindow,
    lows: RollingWindow,
    true_ranges: RollingWindow,
    last_close: Option<Decimal>,
    bid: Option<Decimal>,
    ask: Option<Decimal>,
}

impl InstrumentStats {
    pub fn new(lookbacks: StatsLookbacks) -> Self {
        Self {
            closes: RollingWindow::new(lookbacks.correlation.max(2)),
            highs: RollingWindow::new(lookbacks.range),
            lows: RollingWindow::new(lookbacks.range),
            true_ranges: RollingWindow::new(lookbacks.atr),
            last_close: None,
            bid: None,
            ask: None,
        }
    }

    /// Ingest one finalized bar.
    ///
    /// The first bar's true range is its high-low span; later bars also
    /// consider the gap from the previous close.
    pub fn update(&mut self, _open: Decimal, high: Decimal, low: Decimal, close: Decimal) {
        self.closes.add(close);
        self.highs.add(high);
        self.lows.add(low);

        let span = high - low;
        let true_range = match self.last_close {
            Some(prev) => span.max((high - prev).abs()).max((low - prev).abs()),
            None => span,
        };
        self.true_ranges.add(true_range);

        self.last_close = Some(close);
    }

    /// Store the best bid and/or ask. Absent sides keep their previous value.
    pub fn update_quote(&mut self, bid: Option<Decimal>, ask: Option<Decimal>) {
        if bid.is_some() {
            self.bid = bid;
        }
        if ask.is_some() {
            self.ask = ask;
        }
    }

    /// Whether enough closes exist to correlate over `n` samples.
    pub fn has_correlation_data(&self, n: usize) -> bool {
        if n == 0 {
            self.closes.count() >= 2
        } else {
            self.closes.count() >= n
        }
    }

    /// Whether both the high and low windows hold at least `n` samples.
    pub fn has_range_data(&self, n: usize) -> bool {
        self.highs.count() >= n && self.lows.count() >= n
    }

    /// Current spread in price steps, if both quotes and a positive step are known.
    pub fn spread_in_points(&self, price_step: Decimal) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) if price_step > Decimal::ZERO => {
                Some((ask - bid) / price_step)
            }
            _ => None,
        }
    }

    /// Average true range over the most recent `n` samples.
    pub fn atr(&self, n: usize) -> Decimal {
        self.true_ranges.mean(n)
    }

    /// Highest high and lowest low over the most recent `n` bars.
    pub fn range_extremes(&self, n: usize) -> (Decimal, Decimal) {
        (self.highs.max(n), self.lows.min(n))
    }

    pub fn closes(&self) -> &RollingWindow {
        &self.closes
    }

    pub fn true_ranges(&self) -> &RollingWindow {
        &self.true_ranges
    }

    pub fn last_close(&self) -> Option<Decimal> {
        self.last_close
    }

    pub fn has_previous_close(&self) -> bool {
        self.last_close.is_some()
    }

    pub fn bid(&self) -> Option<Decimal> {
        self.bid
    }

    pub fn ask(&self) -> Option<Decimal> {
        self.ask
    }
}
