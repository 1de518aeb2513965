//! Rolling statistics: ring buffers and per-instrument price state.

mod instrument;
mod window;

pub use instrument::{InstrumentStats, StatsLookbacks};
pub use window::{Recent, RollingWindow};
