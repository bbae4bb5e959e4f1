//! Manager configuration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default cap on cascade rounds per dispatch call.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Tunables for a [`DependencyManager`](crate::dependency::DependencyManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Maximum cascade rounds per `dispatch_events` call.
    pub max_iterations: usize,
    /// Promote per-delivery logging from `trace` to `debug`.
    pub debug_mode: bool,
    /// Default for `DispatchOptions::intra_tick_cascade`.
    pub intra_tick_cascade: bool,
    /// Default for `DispatchOptions::delegate_to_namespaces`.
    pub delegate_to_namespaces: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            debug_mode: false,
            intra_tick_cascade: true,
            delegate_to_namespaces: true,
        }
    }
}

impl ManagerConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "max_iterations must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}
