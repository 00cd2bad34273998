//! # Configuration
//!
//! Layered configuration built with the `config` crate:
//!
//! 1. struct defaults
//! 2. `config/base.toml`
//! 3. `config/<environment>.toml`
//! 4. environment variables `NMOS_CONTROL__<SECTION>__<KEY>`
//!
//! Later layers override earlier ones key by key. The merged result is
//! validated before it is handed out.
//!
//! ```rust,no_run
//! use nmos_control::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::from_environment().load()?;
//! let timeout = config.is05.request_timeout();
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ControlError, ControlResult};

pub use loader::ConfigLoader;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub database: DatabaseConfig,
    pub runners: RunnersConfig,
    pub is05: Is05Config,
    pub events: EventsConfig,
}

impl ControlConfig {
    pub fn validate(&self) -> ControlResult<()> {
        if self.database.max_connections == 0 {
            return Err(invalid("database.max_connections", "must be at least 1"));
        }
        if self.runners.activation_poll_interval_secs == 0 {
            return Err(invalid("runners.activation_poll_interval_secs", "must be positive"));
        }
        if self.runners.playbook_poll_interval_secs == 0 {
            return Err(invalid("runners.playbook_poll_interval_secs", "must be positive"));
        }
        if self.runners.automation_tick_interval_secs == 0 {
            return Err(invalid("runners.automation_tick_interval_secs", "must be positive"));
        }
        if self.is05.request_timeout_ms == 0 {
            return Err(invalid("is05.request_timeout_ms", "must be positive"));
        }
        if self.events.channel_capacity == 0 {
            return Err(invalid("events.channel_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: &str) -> ControlError {
    ControlError::ConfigurationError(format!("{key} {reason}"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/nmos_control".to_string(),
            max_connections: 10,
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnersConfig {
    pub activation_runner_enabled: bool,
    pub activation_poll_interval_secs: u64,
    pub playbook_runner_enabled: bool,
    pub playbook_poll_interval_secs: u64,
    pub automation_runner_enabled: bool,
    pub automation_tick_interval_secs: u64,
}

impl RunnersConfig {
    pub fn activation_poll_interval(&self) -> Duration {
        Duration::from_secs(self.activation_poll_interval_secs)
    }

    pub fn playbook_poll_interval(&self) -> Duration {
        Duration::from_secs(self.playbook_poll_interval_secs)
    }

    pub fn automation_tick_interval(&self) -> Duration {
        Duration::from_secs(self.automation_tick_interval_secs)
    }
}

impl Default for RunnersConfig {
    fn default() -> Self {
        Self {
            activation_runner_enabled: true,
            activation_poll_interval_secs: 10,
            playbook_runner_enabled: true,
            playbook_poll_interval_secs: 10,
            automation_runner_enabled: true,
            automation_tick_interval_secs: 30,
        }
    }
}

/// Outbound IS-05 call settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Is05Config {
    pub request_timeout_ms: u64,
}

impl Is05Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for Is05Config {
    fn default() -> Self {
        Self {
            request_timeout_ms: 8000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
        }
    }
}
