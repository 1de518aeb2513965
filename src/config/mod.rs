//! Configuration management for the overlay hedger.
//!
//! Loads settings from environment variables and config files.

use crate::error::EngineError;
use crate::market::InstrumentSpec;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Instruments the engine tracks
    #[serde(default)]
    pub universe: UniverseConfig,
    /// Correlation and pair qualification settings
    #[serde(default)]
    pub pairs: PairSelectionConfig,
    /// Overlay divergence detection
    #[serde(default)]
    pub overlay: OverlayConfig,
    /// Take-profit targets
    #[serde(default)]
    pub exit: ExitConfig,
    /// Exposure and spread limits
    #[serde(default)]
    pub risk: RiskConfig,
    /// Order sizing
    #[serde(default)]
    pub sizing: SizingConfig,
    /// Paper execution venue
    #[serde(default)]
    pub paper: PaperConfig,
    /// Hedge journal
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseConfig {
    /// Instrument list; ids are assigned in this order
    #[serde(default = "default_instruments")]
    pub instruments: Vec<InstrumentSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairSelectionConfig {
    /// Close samples kept and correlated (0 keeps only the last two)
    #[serde(default = "default_correlation_lookback")]
    pub correlation_lookback: usize,
    /// Bars used for the high/low overlay range
    #[serde(default = "default_range_lookback")]
    pub range_lookback: usize,
    /// True-range samples averaged for ATR (0 keeps only the latest)
    #[serde(default = "default_atr_lookback")]
    pub atr_lookback: usize,
    /// Minimum absolute Pearson correlation for a pair to qualify (0.0-1.0)
    #[serde(default = "default_correlation_threshold")]
    pub correlation_threshold: Decimal,
    /// UTC hour after which the daily pair recalculation runs (0-23)
    #[serde(default)]
    pub recalc_hour: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Divergence in main-leg points required to open a hedge
    #[serde(default = "default_overlay_threshold")]
    pub threshold: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    /// Close when the hedge's point profit reaches `take_profit_points`
    #[serde(default = "default_true")]
    pub take_profit_points_enabled: bool,
    #[serde(default = "default_take_profit_points")]
    pub take_profit_points: Decimal,
    /// Close when the hedge's currency profit reaches `take_profit_currency`
    #[serde(default)]
    pub take_profit_currency_enabled: bool,
    #[serde(default = "default_take_profit_currency")]
    pub take_profit_currency: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum simultaneously open hedges (0 = unbounded)
    #[serde(default = "default_max_open_pairs")]
    pub max_open_pairs: usize,
    /// Maximum spread in points on either leg to open (0 = no check)
    #[serde(default = "default_max_spread")]
    pub max_spread: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Sub-leg volume; the main leg trades `base_volume * atr_ratio`
    #[serde(default = "default_base_volume")]
    pub base_volume: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// Starting account balance for paper trading
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,
    /// Commission charged per lot traded, in account currency
    #[serde(default)]
    pub commission_per_lot: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistenceConfig {
    /// SQLite journal path (None = no journal)
    #[serde(default)]
    pub journal_path: Option<String>,
}

// Default value functions
fn default_instruments() -> Vec<InstrumentSpec> {
    ["EURUSD", "GBPUSD", "AUDUSD", "NZDUSD"]
        .into_iter()
        .map(|symbol| {
            InstrumentSpec::new(symbol, Decimal::new(1, 5)).with_volume_limits(
                Decimal::new(1, 2),   // 0.01 lots
                Decimal::new(100, 0), // 100 lots
                Decimal::new(1, 2),
            )
        })
        .collect()
}

fn default_correlation_lookback() -> usize {
    500
}

fn default_range_lookback() -> usize {
    200
}

fn default_atr_lookback() -> usize {
    100
}

fn default_correlation_threshold() -> Decimal {
    Decimal::new(90, 2) // 0.90
}

fn default_overlay_threshold() -> Decimal {
    Decimal::new(100, 0) // 100 points
}

fn default_true() -> bool {
    true
}

fn default_take_profit_points() -> Decimal {
    Decimal::new(100, 0)
}

fn default_take_profit_currency() -> Decimal {
    Decimal::new(50, 0)
}

fn default_max_open_pairs() -> usize {
    2
}

fn default_max_spread() -> Decimal {
    Decimal::new(20, 0) // 20 points
}

fn default_base_volume() -> Decimal {
    Decimal::new(1, 1) // 0.1 lots
}

fn default_initial_balance() -> Decimal {
    Decimal::new(10000, 0)
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("OVH"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> std::result::Result<(), EngineError> {
        fn ensure(cond: bool, msg: &str) -> std::result::Result<(), EngineError> {
            if cond {
                Ok(())
            } else {
                Err(EngineError::ConfigurationInvalid(msg.to_string()))
            }
        }

        ensure(
            self.universe.instruments.len() >= 2,
            "universe must contain at least two instruments",
        )?;
        ensure(
            self.sizing.base_volume > Decimal::ZERO,
            "base_volume must be positive",
        )?;
        ensure(
            self.pairs.correlation_threshold >= Decimal::ZERO
                && self.pairs.correlation_threshold <= Decimal::ONE,
            "correlation_threshold must be between 0 and 1",
        )?;
        ensure(
            self.pairs.range_lookback >= 1,
            "range_lookback must be at least 1",
        )?;
        ensure(self.pairs.recalc_hour < 24, "recalc_hour must be 0-23")?;
        ensure(
            self.overlay.threshold >= Decimal::ZERO,
            "overlay threshold must not be negative",
        )?;
        ensure(
            self.risk.max_spread >= Decimal::ZERO,
            "max_spread must not be negative",
        )?;
        ensure(
            !self.exit.take_profit_points_enabled || self.exit.take_profit_points > Decimal::ZERO,
            "take_profit_points must be positive when enabled",
        )?;
        ensure(
            !self.exit.take_profit_currency_enabled
                || self.exit.take_profit_currency > Decimal::ZERO,
            "take_profit_currency must be positive when enabled",
        )?;
        ensure(
            self.paper.commission_per_lot >= Decimal::ZERO,
            "commission_per_lot must not be negative",
        )?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            universe: UniverseConfig::default(),
            pairs: PairSelectionConfig::default(),
            overlay: OverlayConfig::default(),
            exit: ExitConfig::default(),
            risk: RiskConfig::default(),
            sizing: SizingConfig::default(),
            paper: PaperConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            instruments: default_instruments(),
        }
    }
}

impl Default for PairSelectionConfig {
    fn default() -> Self {
        Self {
            correlation_lookback: default_correlation_lookback(),
            range_lookback: default_range_lookback(),
            atr_lookback: default_atr_lookback(),
            correlation_threshold: default_correlation_threshold(),
            recalc_hour: 0,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            threshold: default_overlay_threshold(),
        }
    }
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            take_profit_points_enabled: true,
            take_profit_points: default_take_profit_points(),
            take_profit_currency_enabled: false,
            take_profit_currency: default_take_profit_currency(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_open_pairs: default_max_open_pairs(),
            max_spread: default_max_spread(),
        }
    }
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            base_volume: default_base_volume(),
        }
    }
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
            commission_per_lot: Decimal::ZERO,
        }
    }
}
