//! Intended net exposure per instrument and the instructions derived from it.

use crate::market::{InstrumentId, Universe};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

/// Deltas at or below this size (in volume units) are not sent.
pub const EXPOSURE_EPSILON: Decimal = dec!(0.000001);

/// Idempotent "desired net position" instruction for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetExposure {
    pub instrument: InstrumentId,
    pub symbol: String,
    /// Desired signed net volume
    pub target: Decimal,
    /// Change from the previously intended exposure
    pub delta: Decimal,
    /// Free-form label of the decision that produced the target
    pub tag: String,
}

impl TargetExposure {
    /// Exposure the book held before this instruction.
    pub fn previous(&self) -> Decimal {
        self.target - self.delta
    }
}

#[derive(Debug, Clone, Default)]
struct Slot {
    current: Decimal,
    target: Decimal,
    tag: String,
}

/// Tracks intended vs. last-issued exposure per instrument.
#[derive(Debug, Clone)]
pub struct ExposureBook {
    slots: Vec<Slot>,
}

impl ExposureBook {
    pub fn new(instrument_count: usize) -> Self {
        Self {
            slots: vec![Slot::default(); instrument_count],
        }
    }

    /// Set the desired net exposure of an instrument.
    pub fn set_target(&mut self, id: InstrumentId, target: Decimal, tag: impl Into<String>) {
        if let Some(slot) = self.slots.get_mut(id.index()) {
            slot.target = target;
            slot.tag = tag.into();
        }
    }

    /// Last exposure issued for an instrument.
    pub fn current(&self, id: InstrumentId) -> Decimal {
        self.slots
            .get(id.index())
            .map(|s| s.current)
            .unwrap_or(Decimal::ZERO)
    }

    /// Desired exposure for an instrument.
    pub fn target(&self, id: InstrumentId) -> Decimal {
        self.slots
            .get(id.index())
            .map(|s| s.target)
            .unwrap_or(Decimal::ZERO)
    }

    /// Emit an instruction for every instrument whose target moved by more
    /// than [`EXPOSURE_EPSILON`], assuming each is applied.
    pub fn drain(&mut self, universe: &Universe) -> Vec<TargetExposure> {
        let mut out = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let delta = slot.target - slot.current;
            if delta.abs() <= EXPOSURE_EPSILON {
                continue;
            }
            let id = InstrumentId(index);
            out.push(TargetExposure {
                instrument: id,
                symbol: universe.symbol(id).to_string(),
                target: slot.target,
                delta,
                tag: slot.tag.clone(),
            });
            slot.current = slot.target;
        }
        out
    }

    /// Undo an instruction the venue refused so it is re-emitted next drain.
    ///
    /// Ignored if the book has issued a newer exposure for the instrument since.
    pub fn rollback(&mut self, instruction: &TargetExposure) {
        if let Some(slot) = self.slots.get_mut(instruction.instrument.index()) {
            if slot.current == instruction.target {
                slot.current = instruction.previous();
            }
        }
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = Slot::default();
        }
    }
}
