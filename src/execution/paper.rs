//! Paper execution venue for backtests and dry runs.
//!
//! Fills every instruction in full at the latest mark price. Profit is
//! valued per instrument as `price move / price_step * step_value` per lot.

use super::{ExecutionVenue, Fill, TargetExposure, EXPOSURE_EPSILON};
use crate::config::PaperConfig;
use crate::error::ExecutionError;
use crate::market::InstrumentSpec;
use crate::utils::effective_step;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Net position in one symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PaperPosition {
    pub symbol: String,
    /// Signed net volume
    pub net: Decimal,
    /// Volume-weighted entry price of the open volume
    pub avg_entry: Decimal,
    /// Currency profit realized in this symbol
    pub realized_pnl: Decimal,
}

/// Account snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaperAccount {
    pub initial_balance: Decimal,
    /// Initial balance plus realized profit minus commission
    pub balance: Decimal,
    pub unrealized_pnl: Decimal,
    pub equity: Decimal,
    pub realized_pnl: Decimal,
    pub commission_paid: Decimal,
    pub order_count: u64,
    pub positions: Vec<PaperPosition>,
}

#[derive(Debug, Default)]
struct PaperState {
    balance: Decimal,
    realized_pnl: Decimal,
    commission_paid: Decimal,
    order_count: u64,
    positions: HashMap<String, PaperPosition>,
    marks: HashMap<String, Decimal>,
}

/// In-process venue that simulates immediate fills.
pub struct PaperVenue {
    state: Arc<RwLock<PaperState>>,
    specs: HashMap<String, InstrumentSpec>,
    initial_balance: Decimal,
    commission_per_lot: Decimal,
    order_id_counter: AtomicU64,
}

impl PaperVenue {
    pub fn new(specs: &[InstrumentSpec], config: &PaperConfig) -> Self {
        let state = PaperState {
            balance: config.initial_balance,
            ..Default::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            specs: specs
                .iter()
                .map(|spec| (spec.symbol.clone(), spec.clone()))
                .collect(),
            initial_balance: config.initial_balance,
            commission_per_lot: config.commission_per_lot,
            order_id_counter: AtomicU64::new(1),
        }
    }

    /// Update the price fills and valuations use for a symbol.
    pub async fn mark(&self, symbol: &str, price: Decimal) {
        self.state
            .write()
            .await
            .marks
            .insert(symbol.to_string(), price);
    }

    /// Reset to the initial balance with no positions or marks.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        *state = PaperState {
            balance: self.initial_balance,
            ..Default::default()
        };
        self.order_id_counter.store(1, Ordering::SeqCst);
        debug!(balance = %self.initial_balance, "Paper venue reset");
    }

    /// Balance, equity, and positions at current marks.
    pub async fn account(&self) -> PaperAccount {
        let state = self.state.read().await;

        let mut unrealized = Decimal::ZERO;
        for position in state.positions.values() {
            if let Some(&mark) = state.marks.get(&position.symbol) {
                unrealized += self.value_move(&position.symbol, position.net, position.avg_entry, mark);
            }
        }

        let mut positions: Vec<PaperPosition> = state
            .positions
            .values()
            .filter(|p| !p.net.is_zero())
            .cloned()
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        PaperAccount {
            initial_balance: self.initial_balance,
            balance: state.balance,
            unrealized_pnl: unrealized,
            equity: state.balance + unrealized,
            realized_pnl: state.realized_pnl,
            commission_paid: state.commission_paid,
            order_count: state.order_count,
            positions,
        }
    }

    /// Currency value of moving `volume` lots from `from` to `to`.
    fn value_move(&self, symbol: &str, volume: Decimal, from: Decimal, to: Decimal) -> Decimal {
        let (step, step_value) = self
            .specs
            .get(symbol)
            .map(|s| (s.price_step, s.step_value))
            .unwrap_or((Decimal::ONE, Decimal::ONE));
        volume * (to - from) / effective_step(step) * step_value
    }

    fn next_order_id(&self) -> u64 {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionVenue for PaperVenue {
    async fn set_target_exposure(&self, instruction: &TargetExposure) -> Result<Fill, ExecutionError> {
        let symbol = &instruction.symbol;
        let target = instruction.target;

        let spec = self
            .specs
            .get(symbol)
            .ok_or_else(|| ExecutionError::Rejected {
                symbol: symbol.clone(),
                target,
                reason: "unknown symbol".to_string(),
            })?;
        if spec.max_volume > Decimal::ZERO && target.abs() > spec.max_volume {
            return Err(ExecutionError::Rejected {
                symbol: symbol.clone(),
                target,
                reason: format!("exceeds max volume {}", spec.max_volume),
            });
        }

        let mut state = self.state.write().await;
        let price = state
            .marks
            .get(symbol)
            .copied()
            .ok_or_else(|| ExecutionError::NoMarkPrice(symbol.clone()))?;

        let mut position = state
            .positions
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| PaperPosition {
                symbol: symbol.clone(),
                ..Default::default()
            });

        let traded = target - position.net;
        let mut realized = Decimal::ZERO;

        if traded.abs() > EXPOSURE_EPSILON {
            let same_side = position.net.is_zero()
                || position.net.is_sign_positive() == traded.is_sign_positive();

            if same_side {
                let open_volume = position.net.abs() + traded.abs();
                position.avg_entry =
                    (position.net.abs() * position.avg_entry + traded.abs() * price) / open_volume;
            } else {
                let closing = traded.abs().min(position.net.abs());
                let closing_signed = if position.net.is_sign_positive() {
                    closing
                } else {
                    -closing
                };
                realized = self.value_move(symbol, closing_signed, position.avg_entry, price);

                if traded.abs() > position.net.abs() {
                    // Flipped through flat: the remainder opens at the fill price
                    position.avg_entry = price;
                }
            }
            position.net = target;
            if position.net.is_zero() {
                position.avg_entry = Decimal::ZERO;
            }
        }

        let commission = traded.abs() * self.commission_per_lot;
        position.realized_pnl += realized;
        state.realized_pnl += realized;
        state.commission_paid += commission;
        state.balance += realized - commission;
        state.order_count += 1;
        let net = position.net;
        state.positions.insert(symbol.clone(), position);

        let order_id = self.next_order_id();
        info!(
            order_id,
            %symbol,
            traded = %traded,
            net = %net,
            price = %price,
            realized = %realized,
            tag = %instruction.tag,
            "Paper fill"
        );

        Ok(Fill {
            order_id,
            symbol: symbol.clone(),
            traded,
            net,
            price,
            commission,
            realized_pnl: realized,
            filled_at: Utc::now(),
        })
    }

    async fn net_exposure(&self, symbol: &str) -> Decimal {
        self.state
            .read()
            .await
            .positions
            .get(symbol)
            .map(|p| p.net)
            .unwrap_or(Decimal::ZERO)
    }

    async fn mark_price(&self, symbol: &str, price: Decimal) {
        self.mark(symbol, price).await;
    }
}
