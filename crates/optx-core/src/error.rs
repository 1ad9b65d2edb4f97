//! # Optimizer Errors
//!
//! A single error enum covers every failure the core can surface. Only two of them
//! are expected in correct operation: `PlanOptimizationTimeout` (the query's planning
//! budget ran out) and `InvalidSessionProperty` (bad user input). Everything else
//! signals a broken invariant in the memo, a rule or a collaborator and is propagated
//! to the caller of the optimization pass untouched.

use crate::memo::GroupId;
use crate::expr::Variable;

/// Result alias used throughout the optimizer.
pub type OptimizerResult<T> = std::result::Result<T, OptimizerError>;

#[derive(Debug, thiserror::Error)]
pub enum OptimizerError {
    /// A group reference outlived its group.
    #[error("Unknown group: {0}")]
    UnknownGroup(GroupId),

    /// The time or iteration budget of a single optimization pass ran out.
    #[error("The optimizer exhausted its budget after {elapsed_ms}ms and {iterations} rule attempts (timeout {timeout_ms}ms, max iterations {max_iterations})")]
    PlanOptimizationTimeout {
        elapsed_ms: u128,
        timeout_ms: u64,
        iterations: usize,
        max_iterations: usize,
    },

    /// A replacement node does not produce the same set of output variables.
    #[error("{reason}: transformed plan must have the same output variables as the original\n\texpected: {expected:?}\n\tactual:   {actual:?}")]
    SchemaMismatch {
        reason: String,
        expected: Vec<Variable>,
        actual: Vec<Variable>,
    },

    /// Raised by the single-rule harness when a fired rule breaks its contract.
    #[error("{0}")]
    RuleApplicationAssertion(String),

    #[error("Estimation failed: {0}")]
    Estimation(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid value for session property '{name}': {message}")]
    InvalidSessionProperty { name: String, message: String },

    #[error("Transaction failed: {0}")]
    Transaction(String),
}

impl OptimizerError {
    pub fn invalid_plan<S: Into<String>>(msg: S) -> Self {
        Self::InvalidPlan(msg.into())
    }

    pub fn estimation<S: Into<String>>(msg: S) -> Self {
        Self::Estimation(msg.into())
    }

    /// Whether this failure only affects the current query's planning.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PlanOptimizationTimeout { .. } | Self::InvalidSessionProperty { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OptimizerError::UnknownGroup(7);
        assert_eq!(err.to_string(), "Unknown group: 7");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_timeout_is_recoverable() {
        let err = OptimizerError::PlanOptimizationTimeout {
            elapsed_ms: 12,
            timeout_ms: 10,
            iterations: 40,
            max_iterations: 1000,
        };
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("40 rule attempts"));
    }
}
