//! Optimizer configuration.
//!
//! `OptimizerConfig` holds deployment-wide defaults. Session properties override the
//! budget per query; see [`OptimizerConfig::with_session_overrides`].

use crate::error::OptimizerResult;
use crate::session::{Session, ITERATIVE_OPTIMIZER_MAX_ITERATIONS, ITERATIVE_OPTIMIZER_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Order in which the driver visits a group and its children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOrder {
    /// Rewrite the node first, then its children, then revisit the node if any child
    /// changed.
    #[default]
    TopDown,
    /// Rewrite the children first, then the node.
    BottomUp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Wall-clock budget of one optimization pass.
    pub timeout_ms: u64,
    /// Upper bound on rule attempts in one pass.
    pub max_iterations: usize,
    pub apply_order: ApplyOrder,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 180_000,
            max_iterations: 1_000_000,
            apply_order: ApplyOrder::TopDown,
        }
    }
}

impl OptimizerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// This configuration with the session's budget properties applied.
    pub fn with_session_overrides(&self, session: &Session) -> OptimizerResult<Self> {
        let mut config = self.clone();
        if let Some(timeout_ms) = session.parse_property(ITERATIVE_OPTIMIZER_TIMEOUT)? {
            config.timeout_ms = timeout_ms;
        }
        if let Some(max_iterations) = session.parse_property(ITERATIVE_OPTIMIZER_MAX_ITERATIONS)? {
            config.max_iterations = max_iterations;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OptimizerConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(180));
        assert_eq!(config.apply_order, ApplyOrder::TopDown);
    }

    #[test]
    fn test_session_overrides() {
        let session = Session::new("q")
            .with_system_property(ITERATIVE_OPTIMIZER_TIMEOUT, "50")
            .with_system_property(ITERATIVE_OPTIMIZER_MAX_ITERATIONS, "7");
        let config = OptimizerConfig::default().with_session_overrides(&session).unwrap();
        assert_eq!(config.timeout_ms, 50);
        assert_eq!(config.max_iterations, 7);
    }

    #[test]
    fn test_partial_json() {
        let config: OptimizerConfig = serde_json::from_str(r#"{"apply_order":"bottom_up"}"#).unwrap();
        assert_eq!(config.apply_order, ApplyOrder::BottomUp);
        assert_eq!(config.max_iterations, 1_000_000);
    }
}
