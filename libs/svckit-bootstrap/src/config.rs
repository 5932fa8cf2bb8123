//! Layered process configuration.
//!
//! Precedence, lowest to highest:
//!   1. built-in defaults
//!   2. YAML file (optional)
//!   3. environment variables `SVCKIT__<SECTION>__<KEY>`

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use svckit::{
    ConfigError, LifecycleConfig, Microservice, MicroserviceBuilder, MicroserviceDefinition,
};

/// Prefix of environment overrides; nested keys are separated by `__`.
pub const ENV_PREFIX: &str = "SVCKIT__";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub lifecycle: LifecycleConfig,
    pub logging: LoggingConfig,
    /// Raw microservice tunables, validated against the definition's configuration model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub microservice: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    pub format: LogFormat,
    #[serde(default = "default_ansi")]
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            ansi: default_ansi(),
        }
    }
}

fn default_level() -> String {
    "info".to_owned()
}

fn default_ansi() -> bool {
    true
}

impl AppConfig {
    /// Load defaults, then `path` (if given), then environment overrides.
    ///
    /// # Errors
    /// Returns an error if `path` does not exist, or if the merged configuration
    /// does not deserialize (unknown keys, wrong types).
    pub fn load_layered(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.is_file() {
                anyhow::bail!("config file not found: {}", path.display());
            }
            tracing::debug!(path = %path.display(), "loading configuration file");
            figment = figment.merge(Yaml::file(path));
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("invalid configuration")
    }

    /// Builder for `definition` with lifecycle timing and resolved tunables applied.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the `microservice` section does not satisfy the
    /// definition's configuration model.
    pub fn microservice_builder(
        &self,
        definition: Arc<dyn MicroserviceDefinition>,
    ) -> Result<MicroserviceBuilder, ConfigError> {
        let resolved = definition
            .configuration_model()
            .resolve(self.microservice.as_ref())?;
        Ok(Microservice::builder(definition)
            .with_lifecycle_config(self.lifecycle.clone())
            .with_config(resolved))
    }
}
