//! Error types for memoctl scenarios

use std::fmt;

/// Result type alias for scenario runs
pub type Result<T> = std::result::Result<T, ScenarioError>;

/// Failures raised inside memoized recurrences
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioError {
    /// Intermediate value does not fit in u128
    Overflow {
        /// Recurrence name
        op: &'static str,
        /// Argument at which the overflow happened
        n: u64,
    },

    /// Argument rejected before computing
    InvalidInput(String),
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioError::Overflow { op, n } => {
                write!(f, "Overflow: {}({}) does not fit in u128", op, n)
            }
            ScenarioError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
        }
    }
}

impl std::error::Error for ScenarioError {}
