//! Error taxonomy for layout generation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline stage, reported to stage hooks and in deadline errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Terrain,
    Exclusions,
    Placement,
    Routing,
    Earthwork,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Terrain => "terrain",
            Stage::Exclusions => "exclusions",
            Stage::Placement => "placement",
            Stage::Routing => "routing",
            Stage::Earthwork => "earthwork",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum LayoutError {
    /// Caller supplied a degenerate boundary, empty raster, bad target, etc.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// An internal invariant broke (e.g. earthwork ledger does not reconcile).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    /// Raised by a caller-provided stage hook when a wall-clock budget ran out.
    #[error("deadline exceeded before {stage} stage")]
    DeadlineExceeded { stage: Stage },
    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse classification used by callers to pick a remediation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Fix the input.
    InvalidInput,
    /// File a bug.
    Internal,
    /// Safe to run again.
    Retryable,
}

impl LayoutError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LayoutError::InvalidInput(_) | LayoutError::Config(_) => ErrorClass::InvalidInput,
            LayoutError::InvariantViolation(_) => ErrorClass::Internal,
            LayoutError::DeadlineExceeded { .. } => ErrorClass::Retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }
}
