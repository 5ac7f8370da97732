//! Driver configuration. Env-only — the process boundary has no CLI flags.

use std::time::Duration;

/// Env var overriding the simulated node-boot wait, in whole seconds.
pub const ENV_PROVISION_WAIT_SECS: &str = "NODEMAN_PROVISION_WAIT_SECS";

const DEFAULT_PROVISION_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// How long the `node-up` callback blocks to simulate the replacement
    /// node booting. Zero in tests.
    pub provision_wait: Duration,
}

impl DriverConfig {
    pub fn from_env() -> Self {
        Self {
            provision_wait: wait_from(std::env::var(ENV_PROVISION_WAIT_SECS).ok().as_deref()),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            provision_wait: DEFAULT_PROVISION_WAIT,
        }
    }
}

fn wait_from(value: Option<&str>) -> Duration {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_PROVISION_WAIT)
}
