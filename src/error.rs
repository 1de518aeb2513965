//! Typed errors for the hedging engine and its execution collaborators.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised while constructing or driving the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration cannot produce a working engine. Raised at startup only.
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    /// A bar or quote referenced an instrument outside the registered universe.
    #[error("unknown instrument id {0}")]
    UnknownInstrument(usize),
}

/// Errors returned by an execution venue for a target-exposure instruction.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutionError {
    /// The venue refused the instruction outright.
    #[error("target {target} for {symbol} rejected: {reason}")]
    Rejected {
        symbol: String,
        target: Decimal,
        reason: String,
    },

    /// The venue has no price to fill against yet.
    #[error("no mark price available for {0}")]
    NoMarkPrice(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_messages() {
        let err = EngineError::ConfigurationInvalid("base_volume must be positive".into());
        assert_eq!(
            err.to_string(),
            "invalid configuration: base_volume must be positive"
        );

        let err = ExecutionError::Rejected {
            symbol: "EURUSD".into(),
            target: dec!(-2.5),
            reason: "exceeds max volume".into(),
        };
        assert_eq!(
            err.to_string(),
            "target -2.5 for EURUSD rejected: exceeds max volume"
        );
    }
}
