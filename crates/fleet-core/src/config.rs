//! Lifecycle configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name given to a tenant's default fleet when none is configured.
pub const DEFAULT_FLEET_NAME: &str = "not managed fleet";

/// Default bound on a single port call.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for [`crate::FleetLifecycleManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Upper bound on every storage or transport call.
    pub operation_timeout: Duration,
    /// Name used when bootstrapping a default fleet.
    pub default_fleet_name: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            default_fleet_name: DEFAULT_FLEET_NAME.to_string(),
        }
    }
}

impl LifecycleConfig {
    /// Read `FLEET_OP_TIMEOUT_MS` and `FLEET_DEFAULT_NAME`, falling back to
    /// defaults for unset or unparsable values.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = std::env::var("FLEET_OP_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
        {
            config.operation_timeout = Duration::from_millis(ms);
        }
        if let Ok(name) = std::env::var("FLEET_DEFAULT_NAME") {
            if !name.trim().is_empty() {
                config.default_fleet_name = name;
            }
        }
        config
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_default_fleet_name(mut self, name: &str) -> Self {
        self.default_fleet_name = name.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LifecycleConfig::default();
        assert_eq!(config.default_fleet_name, "not managed fleet");
        assert_eq!(config.operation_timeout, Duration::from_secs(30));
    }

    #[test]
    fn builders_override() {
        let config = LifecycleConfig::default()
            .with_operation_timeout(Duration::from_millis(250))
            .with_default_fleet_name("unmanaged");
        assert_eq!(config.operation_timeout, Duration::from_millis(250));
        assert_eq!(config.default_fleet_name, "unmanaged");
    }
}
