//! Engine tuning knobs.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Civil candidates the rule evaluator materializes per refill.
    pub expansion_batch_size: u16,
    /// Upper bound on virtualized instances emitted per recurrence in one
    /// query. `None` means unbounded.
    pub max_instances_per_recurrence: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expansion_batch_size: 256,
            max_instances_per_recurrence: None,
        }
    }
}

impl EngineConfig {
    /// Load from JSON; absent fields take their defaults.
    ///
    /// # Errors
    /// Returns `EngineError::InvalidInput` for malformed JSON, unknown
    /// fields, or zero-valued limits.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidInput(format!("engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns `EngineError::InvalidInput` if a limit is zero.
    pub fn validate(&self) -> Result<()> {
        if self.expansion_batch_size == 0 {
            return Err(EngineError::InvalidInput(
                "expansion_batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_instances_per_recurrence == Some(0) {
            return Err(EngineError::InvalidInput(
                "max_instances_per_recurrence must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}
