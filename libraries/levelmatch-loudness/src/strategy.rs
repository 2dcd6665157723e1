//! Outcome of trying one entry of a fallback chain

use crate::error::LoudnessError;
use levelmatch_core::CoreError;

/// Why a strategy did not produce a result
#[derive(Debug)]
pub(crate) enum StrategyError {
    /// The renderer lacks what the strategy needs; try the next one
    Unsupported(&'static str),
    /// The strategy ran and failed
    Failed(LoudnessError),
}

impl From<LoudnessError> for StrategyError {
    fn from(err: LoudnessError) -> Self {
        Self::Failed(err)
    }
}

impl From<CoreError> for StrategyError {
    fn from(err: CoreError) -> Self {
        Self::Failed(err.into())
    }
}
