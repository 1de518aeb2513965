//! Exposure bookkeeping and execution venues.

mod exposure;
mod paper;
mod traits;

pub use exposure::{ExposureBook, TargetExposure, EXPOSURE_EPSILON};
pub use paper::{PaperAccount, PaperPosition, PaperVenue};
pub use traits::{ExecutionVenue, Fill};

#[cfg(test)]
pub use traits::MockExecutionVenue;
