//! Controller Configuration
//!
//! Passed explicitly to [`crate::controller::Controller`]; nothing in the
//! crate reads process environment.

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Controller configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Role the agent plays, carried into every perception
    pub role: String,

    /// Quality score at or above which a run counts as successful
    pub success_threshold: f64,

    /// Memory entries recalled into the perception context
    pub recall_limit: usize,

    /// Store each cycle's final output in memory
    pub remember_executions: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            role: "Assistant".into(),
            success_threshold: 3.0,
            recall_limit: 3,
            remember_executions: true,
        }
    }
}

impl LoopConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=crate::reflection::MAX_QUALITY).contains(&self.success_threshold) {
            return Err(AgentError::Config(format!(
                "success_threshold {} outside 0..=5",
                self.success_threshold
            )));
        }
        if self.role.trim().is_empty() {
            return Err(AgentError::Config("role must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LoopConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.success_threshold - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_deserialize() {
        let config: LoopConfig = serde_json::from_str(r#"{"role": "Tutor"}"#).unwrap();
        assert_eq!(config.role, "Tutor");
        assert_eq!(config.recall_limit, 3);
    }

    #[test]
    fn test_invalid_threshold() {
        let config = LoopConfig {
            success_threshold: 7.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AgentError::Config(_))));
    }
}
