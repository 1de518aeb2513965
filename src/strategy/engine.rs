//! Bar-driven orchestration of pair qualification, overlay entries, and exits.
//!
//! Per pair the lifecycle is `Unqualified -> Qualified(closed) -> Open ->
//! Qualified(closed)`. Pruning returns closed pairs to `Unqualified`; an open
//! hedge is never pruned.

use super::catalog::{PairCatalog, PairKey, QualificationRules, RecalcSummary};
use super::ledger::{HedgeLedger, HedgeLeg, HedgePnl, HedgeState, LegMark, TakeProfit};
use super::overlay::{self, HedgeAction};
use super::schedule::RecalcSchedule;
use crate::config::Config;
use crate::error::EngineError;
use crate::execution::{ExposureBook, TargetExposure};
use crate::market::{Bar, InstrumentId, Quote, Universe};
use crate::stats::{InstrumentStats, StatsLookbacks};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a qualifying pair was not opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
pub enum OpenRejection {
    #[error("pair is not qualifying")]
    NotQualified,
    #[error("hedge already open")]
    AlreadyOpen,
    #[error("not enough range data")]
    InsufficientRange,
    #[error("a leg is committed to another open hedge")]
    LegCommitted,
    #[error("maximum open pairs reached")]
    MaxOpenPairs,
    #[error("spread unavailable")]
    SpreadUnavailable,
    #[error("spread above maximum")]
    SpreadTooWide,
    #[error("no overlay signal")]
    NoSignal,
    #[error("leg volume not tradable")]
    InvalidVolume,
}

/// A hedge that was opened while processing a bar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HedgeOpened {
    pub key: PairKey,
    pub main_symbol: String,
    pub sub_symbol: String,
    pub action: HedgeAction,
    pub correlation: Decimal,
    pub hedge_range: Decimal,
    pub main: HedgeLeg,
    pub sub: HedgeLeg,
    pub at: DateTime<Utc>,
}

/// A hedge that was closed at its profit target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HedgeClosed {
    pub key: PairKey,
    pub main_symbol: String,
    pub sub_symbol: String,
    pub action: HedgeAction,
    pub pnl: HedgePnl,
    pub opened_at: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

/// Everything that happened while processing one bar.
#[derive(Debug, Clone, Default)]
pub struct BarOutcome {
    pub recalculated: Option<RecalcSummary>,
    pub closed: Vec<HedgeClosed>,
    pub opened: Vec<HedgeOpened>,
    /// Qualifying pairs touching the bar's instrument that did not open
    pub rejected: Vec<(PairKey, OpenRejection)>,
    pub instructions: Vec<TargetExposure>,
}

/// The multi-instrument overlay hedging engine.
pub struct HedgeEngine {
    config: Config,
    universe: Universe,
    lookbacks: StatsLookbacks,
    stats: Vec<InstrumentStats>,
    catalog: PairCatalog,
    ledger: HedgeLedger,
    exposures: ExposureBook,
    schedule: RecalcSchedule,
    take_profit: TakeProfit,
}

impl HedgeEngine {
    /// Validate the configuration and build an engine with empty state.
    pub fn new(config: Config) -> Result<Self, EngineError> {
        config.validate()?;
        let universe = Universe::new(config.universe.instruments.clone())?;

        let lookbacks = StatsLookbacks {
            correlation: config.pairs.correlation_lookback,
            range: config.pairs.range_lookback,
            atr: config.pairs.atr_lookback,
        };
        let rules = QualificationRules {
            correlation_lookback: config.pairs.correlation_lookback,
            atr_lookback: config.pairs.atr_lookback,
            correlation_threshold: config.pairs.correlation_threshold,
        };
        let take_profit = TakeProfit {
            points: config
                .exit
                .take_profit_points_enabled
                .then_some(config.exit.take_profit_points),
            currency: config
                .exit
                .take_profit_currency_enabled
                .then_some(config.exit.take_profit_currency),
        };

        let count = universe.len();
        info!(
            instruments = count,
            correlation_lookback = lookbacks.correlation,
            range_lookback = lookbacks.range,
            atr_lookback = lookbacks.atr,
            threshold = %rules.correlation_threshold,
            "Hedge engine initialized"
        );

        Ok(Self {
            stats: (0..count).map(|_| InstrumentStats::new(lookbacks)).collect(),
            catalog: PairCatalog::new(count, rules),
            ledger: HedgeLedger::new(),
            exposures: ExposureBook::new(count),
            schedule: RecalcSchedule::new(config.pairs.recalc_hour),
            take_profit,
            lookbacks,
            universe,
            config,
        })
    }

    /// Discard all market and hedge state.
    pub fn reset(&mut self) {
        let count = self.universe.len();
        self.stats = (0..count)
            .map(|_| InstrumentStats::new(self.lookbacks))
            .collect();
        self.catalog.clear();
        self.ledger.clear();
        self.exposures.clear();
        self.schedule = RecalcSchedule::new(self.config.pairs.recalc_hour);
        debug!("Hedge engine state reset");
    }

    /// Process one finalized bar end to end.
    pub fn on_bar(&mut self, bar: &Bar) -> Result<BarOutcome, EngineError> {
        let id = bar.instrument;
        let stats = self
            .stats
            .get_mut(id.index())
            .ok_or(EngineError::UnknownInstrument(id.index()))?;
        stats.update(bar.open, bar.high, bar.low, bar.close);

        let mut outcome = BarOutcome::default();

        if self.schedule.poll(bar.open_time) {
            outcome.recalculated = Some(self.catalog.recalculate(&self.stats, &mut self.ledger));
        }

        outcome.closed = self.manage_open_hedges(bar.open_time);

        let candidates = self.catalog.pairs_for(id).to_vec();
        for key in candidates {
            if self.ledger.get(&key).is_some_and(|s| s.is_open) {
                continue;
            }
            match self.try_open(key, bar.open_time) {
                Ok(opened) => outcome.opened.push(opened),
                Err(OpenRejection::NoSignal) => {}
                Err(reason) => {
                    debug!(pair = %key, %reason, "Hedge entry skipped");
                    outcome.rejected.push((key, reason));
                }
            }
        }

        outcome.instructions = self.exposures.drain(&self.universe);
        Ok(outcome)
    }

    /// Record a best bid/ask update.
    pub fn on_quote(&mut self, quote: &Quote) -> Result<(), EngineError> {
        let stats = self
            .stats
            .get_mut(quote.instrument.index())
            .ok_or(EngineError::UnknownInstrument(quote.instrument.index()))?;
        stats.update_quote(quote.bid, quote.ask);
        Ok(())
    }

    /// Recalculate qualifying pairs immediately, outside the daily gate.
    pub fn recalculate_pairs(&mut self, now: DateTime<Utc>) -> RecalcSummary {
        self.schedule.mark_run(now);
        self.catalog.recalculate(&self.stats, &mut self.ledger)
    }

    /// Roll back an instruction the venue refused; it is re-sent on the next bar.
    pub fn on_execution_rejected(&mut self, instruction: &TargetExposure) {
        warn!(
            symbol = %instruction.symbol,
            target = %instruction.target,
            "Target exposure rejected; will retry on next bar"
        );
        self.exposures.rollback(instruction);
    }

    /// Attempt to open the hedge for a qualifying pair.
    pub fn try_open(&mut self, key: PairKey, now: DateTime<Utc>) -> Result<HedgeOpened, OpenRejection> {
        let state = self.ledger.get(&key).ok_or(OpenRejection::NotQualified)?;
        if state.is_open {
            return Err(OpenRejection::AlreadyOpen);
        }
        let (main_id, sub_id) = (key.main(), key.sub());
        let main_stats = &self.stats[main_id.index()];
        let sub_stats = &self.stats[sub_id.index()];

        let range_lookback = self.config.pairs.range_lookback;
        if !main_stats.has_range_data(range_lookback) || !sub_stats.has_range_data(range_lookback) {
            return Err(OpenRejection::InsufficientRange);
        }

        if self.ledger.is_committed(main_id, &key) || self.ledger.is_committed(sub_id, &key) {
            return Err(OpenRejection::LegCommitted);
        }

        let max_open = self.config.risk.max_open_pairs;
        if max_open > 0 && self.ledger.open_count() >= max_open {
            return Err(OpenRejection::MaxOpenPairs);
        }

        let (main_spec, sub_spec) = match (self.universe.spec(main_id), self.universe.spec(sub_id)) {
            (Some(m), Some(s)) => (m, s),
            _ => return Err(OpenRejection::NotQualified),
        };

        let max_spread = self.config.risk.max_spread;
        if max_spread > Decimal::ZERO {
            for (stats, spec) in [(main_stats, main_spec), (sub_stats, sub_spec)] {
                match stats.spread_in_points(spec.price_step) {
                    None => return Err(OpenRejection::SpreadUnavailable),
                    Some(spread) if spread > max_spread => {
                        return Err(OpenRejection::SpreadTooWide)
                    }
                    Some(_) => {}
                }
            }
        }

        let reading = overlay::project(
            main_stats,
            sub_stats,
            state.is_positive,
            range_lookback,
            main_spec.price_step,
        )
        .ok_or(OpenRejection::NoSignal)?;
        let action = HedgeAction::select(
            state.is_positive,
            reading.hedge_range,
            self.config.overlay.threshold,
        );
        if action.is_none() {
            return Err(OpenRejection::NoSignal);
        }

        let base = self.config.sizing.base_volume;
        let main_volume = base
            .checked_mul(state.scale)
            .and_then(|v| main_spec.normalize_volume(v))
            .ok_or(OpenRejection::InvalidVolume)?;
        let sub_volume = sub_spec
            .normalize_volume(base)
            .ok_or(OpenRejection::InvalidVolume)?;

        let (Some(main_entry), Some(sub_entry)) = (main_stats.last_close(), sub_stats.last_close())
        else {
            return Err(OpenRejection::NoSignal);
        };

        let main_symbol = main_spec.symbol.clone();
        let sub_symbol = sub_spec.symbol.clone();
        let correlation = state.correlation;

        let state = self
            .ledger
            .get_mut(&key)
            .ok_or(OpenRejection::NotQualified)?;
        state.open(action, (main_volume, sub_volume), (main_entry, sub_entry), now);

        let tag = format!("open {}/{}", main_symbol, sub_symbol);
        self.exposures
            .set_target(main_id, state.main.signed_volume(), tag.clone());
        self.exposures
            .set_target(sub_id, state.sub.signed_volume(), tag);

        info!(
            pair = %key,
            main = %main_symbol,
            sub = %sub_symbol,
            %action,
            hedge_range = %reading.hedge_range,
            main_volume = %main_volume,
            sub_volume = %sub_volume,
            "Hedge opened"
        );

        Ok(HedgeOpened {
            key,
            main_symbol,
            sub_symbol,
            action,
            correlation,
            hedge_range: reading.hedge_range,
            main: state.main.clone(),
            sub: state.sub.clone(),
            at: now,
        })
    }

    /// Close every open hedge whose profit target has been reached.
    fn manage_open_hedges(&mut self, now: DateTime<Utc>) -> Vec<HedgeClosed> {
        let mut closed = Vec::new();

        for key in self.ledger.open_keys() {
            let Some(pnl) = self.hedge_pnl(&key) else {
                continue;
            };
            if !self.take_profit.is_reached(&pnl) {
                continue;
            }
            let Some(state) = self.ledger.get_mut(&key) else {
                continue;
            };

            let action = state.action;
            let opened_at = state.opened_at;
            state.close();

            let main_symbol = self.universe.symbol(key.main()).to_string();
            let sub_symbol = self.universe.symbol(key.sub()).to_string();
            let tag = format!("close {}/{}", main_symbol, sub_symbol);
            self.exposures.set_target(key.main(), Decimal::ZERO, tag.clone());
            self.exposures.set_target(key.sub(), Decimal::ZERO, tag);

            info!(
                pair = %key,
                main = %main_symbol,
                sub = %sub_symbol,
                points = %pnl.points,
                currency = %pnl.currency,
                "Hedge closed at profit target"
            );

            closed.push(HedgeClosed {
                key,
                main_symbol,
                sub_symbol,
                action,
                pnl,
                opened_at,
                at: now,
            });
        }

        closed
    }

    /// Floating profit of an open hedge at the latest closes.
    pub fn hedge_pnl(&self, key: &PairKey) -> Option<HedgePnl> {
        let state = self.ledger.get(key).filter(|s| s.is_open)?;
        let main = self.leg_mark(key.main())?;
        let sub = self.leg_mark(key.sub())?;
        Some(state.pnl(&main, &sub))
    }

    fn leg_mark(&self, id: InstrumentId) -> Option<LegMark> {
        let spec = self.universe.spec(id)?;
        Some(LegMark {
            last_close: self.stats.get(id.index())?.last_close()?,
            price_step: spec.price_step,
            step_value: spec.step_value,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    pub fn stats(&self, id: InstrumentId) -> Option<&InstrumentStats> {
        self.stats.get(id.index())
    }

    pub fn catalog(&self) -> &PairCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &HedgeLedger {
        &self.ledger
    }

    pub fn hedge(&self, key: &PairKey) -> Option<&HedgeState> {
        self.ledger.get(key)
    }

    pub fn open_count(&self) -> usize {
        self.ledger.open_count()
    }

    /// Intended net exposure of an instrument.
    pub fn target_exposure(&self, id: InstrumentId) -> Decimal {
        self.exposures.target(id)
    }
}
