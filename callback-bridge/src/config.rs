//! Bridge configuration types
//!
//! The raw descriptor has nothing to configure. These settings only affect the
//! checked layers: how many contexts a registry may hold, and what a guarded
//! descriptor does when it is dropped without having been torn down.

use serde::{Deserialize, Serialize};

use crate::types::{BridgeError, Result};

/// Configuration for the checked layers of the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Maximum number of live contexts in a registry (None = unbounded)
    #[serde(default)]
    pub registry_capacity: Option<usize>,

    /// Run the teardown entry point when a guarded descriptor is dropped
    /// before anyone tore it down
    #[serde(default = "default_true")]
    pub teardown_on_drop: bool,

    /// Log every delivered outcome at debug level
    #[serde(default)]
    pub trace_invocations: bool,
}

fn default_true() -> bool {
    true
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            registry_capacity: None,
            teardown_on_drop: true,
            trace_invocations: false,
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: bound the number of live contexts
    pub fn with_registry_capacity(mut self, capacity: usize) -> Self {
        self.registry_capacity = Some(capacity);
        self
    }

    /// Builder method: enable or disable teardown of abandoned descriptors
    pub fn with_teardown_on_drop(mut self, enabled: bool) -> Self {
        self.teardown_on_drop = enabled;
        self
    }

    /// Builder method: enable or disable per-invocation logging
    pub fn with_trace_invocations(mut self, enabled: bool) -> Self {
        self.trace_invocations = enabled;
        self
    }

    /// Reject settings that can never work
    pub fn validate(&self) -> Result<()> {
        if self.registry_capacity == Some(0) {
            return Err(BridgeError::InvalidConfig(
                "registry_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
