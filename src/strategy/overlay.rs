//! Overlay detection: synthetic price projection and hedge action selection.
//!
//! The sub leg's position inside its recent high/low range is mapped onto the
//! main leg's range, producing a synthetic main-leg price. The gap between the
//! real and synthetic price, in main-leg points, is the pair's *hedge range*.

use crate::stats::InstrumentStats;
use crate::utils::{effective_step, midpoint};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade to place on a pair's two legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HedgeAction {
    None,
    BuyMainSellSub,
    SellMainBuySub,
    BuyBoth,
    SellBoth,
}

impl HedgeAction {
    /// Choose an action from the hedge range and the pair's correlation sign.
    pub fn select(is_positive: bool, hedge_range: Decimal, threshold: Decimal) -> Self {
        if hedge_range < -threshold {
            if is_positive {
                HedgeAction::BuyMainSellSub
            } else {
                HedgeAction::BuyBoth
            }
        } else if hedge_range > threshold {
            if is_positive {
                HedgeAction::SellMainBuySub
            } else {
                HedgeAction::SellBoth
            }
        } else {
            HedgeAction::None
        }
    }

    /// The same action with buy and sell swapped on both legs.
    pub fn mirrored(self) -> Self {
        match self {
            HedgeAction::None => HedgeAction::None,
            HedgeAction::BuyMainSellSub => HedgeAction::SellMainBuySub,
            HedgeAction::SellMainBuySub => HedgeAction::BuyMainSellSub,
            HedgeAction::BuyBoth => HedgeAction::SellBoth,
            HedgeAction::SellBoth => HedgeAction::BuyBoth,
        }
    }

    /// Signed direction for the (main, sub) legs: +1 buy, -1 sell, 0 flat.
    pub fn leg_directions(self) -> (i8, i8) {
        match self {
            HedgeAction::None => (0, 0),
            HedgeAction::BuyMainSellSub => (1, -1),
            HedgeAction::SellMainBuySub => (-1, 1),
            HedgeAction::BuyBoth => (1, 1),
            HedgeAction::SellBoth => (-1, -1),
        }
    }

    pub fn is_none(self) -> bool {
        self == HedgeAction::None
    }
}

impl fmt::Display for HedgeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HedgeAction::None => "none",
            HedgeAction::BuyMainSellSub => "buy main / sell sub",
            HedgeAction::SellMainBuySub => "sell main / buy sub",
            HedgeAction::BuyBoth => "buy both",
            HedgeAction::SellBoth => "sell both",
        };
        f.write_str(label)
    }
}

/// Result of projecting a pair's synthetic main-leg price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayReading {
    /// Main-leg range divided by the (possibly inverted) sub-leg range
    pub pips_ratio: Decimal,
    /// Main-leg price implied by the sub leg
    pub synthetic_close: Decimal,
    /// `(main close - synthetic close)` in main-leg points
    pub hedge_range: Decimal,
}

/// Project the synthetic main-leg close from the sub leg.
///
/// Returns `None` when either leg lacks a close, either range is degenerate,
/// or the range ratio is zero. Negatively correlated pairs use the sub leg's
/// range inverted (high and low swapped).
pub fn project(
    main: &InstrumentStats,
    sub: &InstrumentStats,
    is_positive: bool,
    range_lookback: usize,
    main_price_step: Decimal,
) -> Option<OverlayReading> {
    let main_close = main.last_close()?;
    let sub_close = sub.last_close()?;

    let (high_main, low_main) = main.range_extremes(range_lookback);
    let (high_sub, low_sub) = sub.range_extremes(range_lookback);
    if high_main <= low_main || high_sub <= low_sub {
        return None;
    }

    let (sub_high, sub_low) = if is_positive {
        (high_sub, low_sub)
    } else {
        (low_sub, high_sub)
    };

    let sub_span = sub_high - sub_low;
    if sub_span.is_zero() {
        return None;
    }
    let pips_ratio = (high_main - low_main).checked_div(sub_span)?;
    if pips_ratio.is_zero() {
        return None;
    }

    let main_center = midpoint(high_main, low_main);
    let sub_center = midpoint(sub_high, sub_low);
    let synthetic_close = main_center + (sub_close - sub_center).checked_mul(pips_ratio)?;
    let hedge_range = (main_close - synthetic_close).checked_div(effective_step(main_price_step))?;

    Some(OverlayReading {
        pips_ratio,
        synthetic_close,
        hedge_range,
    })
}
