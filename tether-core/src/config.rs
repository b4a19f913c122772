//! Runtime configuration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// When a superseded instance is torn down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownPolicy {
    /// Destroy the old instance right after its replacement is attached,
    /// before the triggering read returns.
    #[default]
    Immediate,

    /// Queue the old instance and destroy it at the next
    /// [`Runtime::settle`](crate::Runtime::settle), or together with its
    /// owner if that happens first.
    Deferred,
}

/// Engine-wide settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Teardown ordering for replaced instances.
    pub teardown: TeardownPolicy,
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Use the given teardown policy.
    pub fn with_teardown(mut self, teardown: TeardownPolicy) -> Self {
        self.teardown = teardown;
        self
    }
}
