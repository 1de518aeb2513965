//! Pair hedging strategy.
//!
//! - `catalog`: correlation/volatility pair qualification
//! - `overlay`: synthetic price projection and action selection
//! - `ledger`: per-pair hedge state and floating PnL
//! - `schedule`: daily recalculation gate
//! - `engine`: bar-driven orchestration

mod catalog;
mod engine;
mod ledger;
mod overlay;
mod schedule;

pub use catalog::{
    correlation, volatility_ratio, PairCatalog, PairKey, QualificationRules, RecalcSummary,
};
pub use engine::{BarOutcome, HedgeClosed, HedgeEngine, HedgeOpened, OpenRejection};
pub use ledger::{HedgeLedger, HedgeLeg, HedgePnl, HedgeState, LegMark, TakeProfit};
pub use overlay::{project, HedgeAction, OverlayReading};
pub use schedule::RecalcSchedule;
