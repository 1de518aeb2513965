//! Hedge state per qualifying pair: lifecycle, legs, and floating PnL.

use super::catalog::PairKey;
use super::overlay::HedgeAction;
use crate::market::InstrumentId;
use crate::utils::effective_step;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// One side of a hedge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HedgeLeg {
    pub instrument: InstrumentId,
    /// +1 long, -1 short, 0 flat
    pub direction: i8,
    pub volume: Decimal,
    pub entry_price: Option<Decimal>,
}

impl HedgeLeg {
    fn flat(instrument: InstrumentId) -> Self {
        Self {
            instrument,
            direction: 0,
            volume: Decimal::ZERO,
            entry_price: None,
        }
    }

    /// Signed net exposure this leg wants on its instrument.
    pub fn signed_volume(&self) -> Decimal {
        Decimal::from(self.direction) * self.volume
    }

    /// Profit in price steps (points) and in currency against `mark`.
    fn pnl(&self, mark: &LegMark) -> HedgePnl {
        let Some(entry) = self.entry_price else {
            return HedgePnl::default();
        };
        let points_per_unit =
            Decimal::from(self.direction) * (mark.last_close - entry) / effective_step(mark.price_step);
        let points = points_per_unit * self.volume;
        HedgePnl {
            points,
            currency: points * mark.step_value,
        }
    }
}

/// Current price and contract metadata for valuing a leg.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegMark {
    pub last_close: Decimal,
    pub price_step: Decimal,
    pub step_value: Decimal,
}

/// Floating profit of a hedge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HedgePnl {
    /// Volume-weighted profit in price steps
    pub points: Decimal,
    /// Profit in account currency
    pub currency: Decimal,
}

impl std::ops::Add for HedgePnl {
    type Output = HedgePnl;

    fn add(self, rhs: HedgePnl) -> HedgePnl {
        HedgePnl {
            points: self.points + rhs.points,
            currency: self.currency + rhs.currency,
        }
    }
}

/// Take-profit targets; `None` disables a target.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TakeProfit {
    pub points: Option<Decimal>,
    pub currency: Option<Decimal>,
}

impl TakeProfit {
    /// Whether either enabled target has been reached.
    pub fn is_reached(&self, pnl: &HedgePnl) -> bool {
        self.points.is_some_and(|target| pnl.points >= target)
            || self.currency.is_some_and(|target| pnl.currency >= target)
    }
}

/// Lifecycle state of a qualifying pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HedgeState {
    pub key: PairKey,
    /// Correlation sign from the last recalculation (zero counts as positive)
    pub is_positive: bool,
    /// Correlation from the last recalculation
    pub correlation: Decimal,
    /// Main-leg volume multiplier (sub ATR / main ATR)
    pub scale: Decimal,
    pub is_open: bool,
    pub action: HedgeAction,
    pub main: HedgeLeg,
    pub sub: HedgeLeg,
    pub opened_at: Option<DateTime<Utc>>,
}

impl HedgeState {
    /// A closed, never-opened state.
    pub fn new(key: PairKey, correlation: Decimal, scale: Decimal) -> Self {
        Self {
            key,
            is_positive: correlation >= Decimal::ZERO,
            correlation,
            scale,
            is_open: false,
            action: HedgeAction::None,
            main: HedgeLeg::flat(key.main()),
            sub: HedgeLeg::flat(key.sub()),
            opened_at: None,
        }
    }

    /// Refresh correlation sign and scale; legs are untouched.
    pub fn refresh(&mut self, correlation: Decimal, scale: Decimal) {
        self.is_positive = correlation >= Decimal::ZERO;
        self.correlation = correlation;
        self.scale = scale;
    }

    /// Record both legs and mark the hedge open.
    pub fn open(
        &mut self,
        action: HedgeAction,
        volumes: (Decimal, Decimal),
        entries: (Decimal, Decimal),
        at: DateTime<Utc>,
    ) {
        let (main_dir, sub_dir) = action.leg_directions();
        self.main.direction = main_dir;
        self.main.volume = volumes.0;
        self.main.entry_price = Some(entries.0);
        self.sub.direction = sub_dir;
        self.sub.volume = volumes.1;
        self.sub.entry_price = Some(entries.1);
        self.action = action;
        self.opened_at = Some(at);
        self.is_open = true;
    }

    /// Flatten both legs and mark the hedge closed.
    pub fn close(&mut self) {
        self.main = HedgeLeg::flat(self.key.main());
        self.sub = HedgeLeg::flat(self.key.sub());
        self.action = HedgeAction::None;
        self.opened_at = None;
        self.is_open = false;
    }

    /// Floating profit across both legs.
    pub fn pnl(&self, main: &LegMark, sub: &LegMark) -> HedgePnl {
        self.main.pnl(main) + self.sub.pnl(sub)
    }

    pub fn legs(&self) -> [&HedgeLeg; 2] {
        [&self.main, &self.sub]
    }
}

/// All hedge states keyed by pair, iterated in key order.
#[derive(Debug, Clone, Default)]
pub struct HedgeLedger {
    states: BTreeMap<PairKey, HedgeState>,
}

impl HedgeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or refresh the state of a pair that qualified this cycle.
    pub fn upsert_qualified(&mut self, key: PairKey, correlation: Decimal, scale: Decimal) {
        self.states
            .entry(key)
            .and_modify(|state| state.refresh(correlation, scale))
            .or_insert_with(|| HedgeState::new(key, correlation, scale));
    }

    /// Remove closed states for which `is_qualifying` is false.
    ///
    /// Open hedges are always kept. Returns the number removed.
    pub fn prune<F>(&mut self, is_qualifying: F) -> usize
    where
        F: Fn(&PairKey) -> bool,
    {
        let before = self.states.len();
        self.states.retain(|key, state| {
            let keep = state.is_open || is_qualifying(key);
            if !keep {
                debug!(pair = %key, "Pruning stale hedge state");
            }
            keep
        });
        before - self.states.len()
    }

    pub fn get(&self, key: &PairKey) -> Option<&HedgeState> {
        self.states.get(key)
    }

    pub fn get_mut(&mut self, key: &PairKey) -> Option<&mut HedgeState> {
        self.states.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HedgeState> {
        self.states.values()
    }

    pub fn open_hedges(&self) -> impl Iterator<Item = &HedgeState> {
        self.states.values().filter(|s| s.is_open)
    }

    pub fn open_keys(&self) -> Vec<PairKey> {
        self.open_hedges().map(|s| s.key).collect()
    }

    pub fn open_count(&self) -> usize {
        self.open_hedges().count()
    }

    /// Whether `instrument` is a leg of an open hedge other than `except`.
    pub fn is_committed(&self, instrument: InstrumentId, except: &PairKey) -> bool {
        self.open_hedges()
            .any(|s| s.key != *except && s.key.contains(instrument))
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}
