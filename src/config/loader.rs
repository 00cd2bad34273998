use config::{Config, Environment, File};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::ControlConfig;
use crate::error::ControlResult;
use crate::logging::get_environment;

const ENV_PREFIX: &str = "NMOS_CONTROL";
const ENV_SEPARATOR: &str = "__";

/// Builds a [`ControlConfig`] from defaults, TOML files and environment variables
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_dir: PathBuf,
    environment: String,
    env_source: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    pub fn new(config_dir: impl Into<PathBuf>, environment: impl Into<String>) -> Self {
        Self {
            config_dir: config_dir.into(),
            environment: environment.into(),
            env_source: None,
        }
    }

    /// `./config` (or `NMOS_CONTROL_CONFIG_DIR`) for the detected environment
    pub fn from_environment() -> Self {
        let dir = std::env::var("NMOS_CONTROL_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
        Self::new(dir, get_environment())
    }

    /// Read overrides from `vars` instead of the process environment
    pub fn with_env_source(mut self, vars: HashMap<String, String>) -> Self {
        self.env_source = Some(vars);
        self
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn load(&self) -> ControlResult<ControlConfig> {
        let base = self.config_dir.join("base.toml");
        let overlay = self.config_dir.join(format!("{}.toml", self.environment));
        debug!(
            environment = %self.environment,
            base = %base.display(),
            overlay = %overlay.display(),
            "Loading configuration"
        );

        let env = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .source(self.env_source.clone());

        let config: ControlConfig = Config::builder()
            .add_source(Config::try_from(&ControlConfig::default())?)
            .add_source(File::from(base).required(false))
            .add_source(File::from(overlay).required(false))
            .add_source(env)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }
}
