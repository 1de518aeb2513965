//! Venue abstraction for target-exposure instructions.

use super::TargetExposure;
use crate::error::ExecutionError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Result of applying a target-exposure instruction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fill {
    pub order_id: u64,
    pub symbol: String,
    /// Signed volume traded to reach the target
    pub traded: Decimal,
    /// Net exposure after the fill
    pub net: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    /// Currency profit realized by the reducing part of the trade
    pub realized_pnl: Decimal,
    pub filled_at: DateTime<Utc>,
}

/// Anything that can drive an instrument's net position to a target.
///
/// Instructions are idempotent: sending the same target twice trades nothing
/// the second time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionVenue: Send + Sync {
    /// Move the net position of `instruction.symbol` to `instruction.target`.
    async fn set_target_exposure(&self, instruction: &TargetExposure) -> Result<Fill, ExecutionError>;

    /// Current net position of a symbol.
    async fn net_exposure(&self, symbol: &str) -> Decimal;

    /// Latest traded price of a symbol, used for fills and valuation.
    async fn mark_price(&self, symbol: &str, price: Decimal);
}
