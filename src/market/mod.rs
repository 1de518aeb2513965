//! Market data types and the instrument universe.
//!
//! Instruments are registered once at startup and addressed by a dense
//! [`InstrumentId`] afterwards, so per-instrument state can live in plain
//! vectors indexed by id.

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Dense instrument identifier assigned at universe registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstrumentId(pub usize);

impl InstrumentId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Static trading metadata for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Symbol as known to the execution venue (e.g., "EURUSD")
    pub symbol: String,
    /// Smallest quoted price increment
    #[serde(default = "default_price_step")]
    pub price_step: Decimal,
    /// Account-currency value of one price step for one unit of volume
    #[serde(default = "default_step_value")]
    pub step_value: Decimal,
    /// Minimum tradable volume (0 = no minimum)
    #[serde(default)]
    pub min_volume: Decimal,
    /// Maximum tradable volume (0 = no maximum)
    #[serde(default)]
    pub max_volume: Decimal,
    /// Volume granularity (0 = continuous)
    #[serde(default)]
    pub volume_step: Decimal,
}

fn default_price_step() -> Decimal {
    Decimal::new(1, 4) // 0.0001
}

fn default_step_value() -> Decimal {
    Decimal::ONE
}

impl InstrumentSpec {
    /// Create a spec with the given symbol and price step; other fields default.
    pub fn new(symbol: impl Into<String>, price_step: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            price_step,
            step_value: default_step_value(),
            min_volume: Decimal::ZERO,
            max_volume: Decimal::ZERO,
            volume_step: Decimal::ZERO,
        }
    }

    /// Set the currency value per price step.
    pub fn with_step_value(mut self, step_value: Decimal) -> Self {
        self.step_value = step_value;
        self
    }

    /// Set volume limits and granularity.
    pub fn with_volume_limits(mut self, min: Decimal, max: Decimal, step: Decimal) -> Self {
        self.min_volume = min;
        self.max_volume = max;
        self.volume_step = step;
        self
    }

    /// Normalize a requested volume to this instrument's tradable grid.
    ///
    /// Rounds down to the volume step and caps at the maximum. Returns `None`
    /// when the result is zero or below the minimum.
    pub fn normalize_volume(&self, requested: Decimal) -> Option<Decimal> {
        let mut volume = crate::utils::round_down_to_lot(requested, self.volume_step);
        if self.max_volume > Decimal::ZERO && volume > self.max_volume {
            volume = self.max_volume;
        }
        if volume <= Decimal::ZERO || volume < self.min_volume {
            return None;
        }
        Some(volume.normalize())
    }
}

/// The registered set of instruments, in id order.
#[derive(Debug, Clone, Default)]
pub struct Universe {
    specs: Vec<InstrumentSpec>,
    by_symbol: HashMap<String, InstrumentId>,
}

impl Universe {
    /// Register instruments, assigning ids in list order.
    pub fn new(specs: Vec<InstrumentSpec>) -> Result<Self, EngineError> {
        let mut by_symbol = HashMap::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            if spec.symbol.trim().is_empty() {
                return Err(EngineError::ConfigurationInvalid(format!(
                    "instrument #{} has an empty symbol",
                    index
                )));
            }
            if by_symbol
                .insert(spec.symbol.clone(), InstrumentId(index))
                .is_some()
            {
                return Err(EngineError::ConfigurationInvalid(format!(
                    "duplicate instrument symbol {}",
                    spec.symbol
                )));
            }
        }
        Ok(Self { specs, by_symbol })
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Look up an instrument's metadata.
    pub fn spec(&self, id: InstrumentId) -> Option<&InstrumentSpec> {
        self.specs.get(id.0)
    }

    /// Resolve a symbol to its id.
    pub fn id_of(&self, symbol: &str) -> Option<InstrumentId> {
        self.by_symbol.get(symbol).copied()
    }

    /// Symbol for an id, or `"?"` when unknown.
    pub fn symbol(&self, id: InstrumentId) -> &str {
        self.specs.get(id.0).map(|s| s.symbol.as_str()).unwrap_or("?")
    }

    pub fn ids(&self) -> impl Iterator<Item = InstrumentId> + '_ {
        (0..self.specs.len()).map(InstrumentId)
    }

    pub fn specs(&self) -> &[InstrumentSpec] {
        &self.specs
    }
}

/// A finalized OHLC bar for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: InstrumentId,
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// Best bid/ask update; either side may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub instrument: InstrumentId,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
}

/// A market-data event delivered to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Bar(Bar),
    Quote(Quote),
}

impl MarketEvent {
    pub fn instrument(&self) -> InstrumentId {
        match self {
            MarketEvent::Bar(bar) => bar.instrument,
            MarketEvent::Quote(quote) => quote.instrument,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_universe_registration() {
        let universe = Universe::new(vec![
            InstrumentSpec::new("EURUSD", dec!(0.00001)),
            InstrumentSpec::new("GBPUSD", dec!(0.00001)),
        ])
        .unwrap();

        assert_eq!(universe.len(), 2);
        assert_eq!(universe.id_of("GBPUSD"), Some(InstrumentId(1)));
        assert_eq!(universe.symbol(InstrumentId(0)), "EURUSD");
        assert_eq!(universe.symbol(InstrumentId(7)), "?");
    }

    #[test]
    fn test_duplicate_symbol_rejected() {
        let result = Universe::new(vec![
            InstrumentSpec::new("EURUSD", dec!(0.00001)),
            InstrumentSpec::new("EURUSD", dec!(0.00001)),
        ]);
        assert!(matches!(result, Err(EngineError::ConfigurationInvalid(_))));
    }

    #[test]
    fn test_normalize_volume() {
        let spec = InstrumentSpec::new("EURUSD", dec!(0.00001)).with_volume_limits(
            dec!(0.01),
            dec!(5),
            dec!(0.01),
        );

        assert_eq!(spec.normalize_volume(dec!(1.237)), Some(dec!(1.23)));
        assert_eq!(spec.normalize_volume(dec!(12)), Some(dec!(5)));
        assert_eq!(spec.normalize_volume(dec!(0.004)), None);

        let unbounded = InstrumentSpec::new("GBPUSD", dec!(0.00001));
        assert_eq!(unbounded.normalize_volume(dec!(1.237)), Some(dec!(1.237)));
        assert_eq!(unbounded.normalize_volume(Decimal::ZERO), None);
    }
}
