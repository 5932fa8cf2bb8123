//! Microservice configuration: orchestrator timing and the per-microservice
//! parameter model.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timing knobs of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LifecycleConfig {
    /// Upper bound for waiting on each required API after start.
    #[serde(default = "default_api_wait_timeout_ms")]
    pub api_wait_timeout_ms: u64,

    /// Delay between readiness probes.
    #[serde(default = "default_api_poll_interval_ms")]
    pub api_poll_interval_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            api_wait_timeout_ms: default_api_wait_timeout_ms(),
            api_poll_interval_ms: default_api_poll_interval_ms(),
        }
    }
}

impl LifecycleConfig {
    #[must_use]
    pub fn api_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.api_wait_timeout_ms)
    }

    #[must_use]
    pub fn api_poll_interval(&self) -> Duration {
        Duration::from_millis(self.api_poll_interval_ms)
    }
}

fn default_api_wait_timeout_ms() -> u64 {
    60_000
}

fn default_api_poll_interval_ms() -> u64 {
    1_000
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("microservice configuration must be an object, got {found}")]
    NotAnObject { found: &'static str },
    #[error("missing required parameter '{name}'")]
    Missing { name: String },
    #[error("unknown parameter '{name}'")]
    Unknown { name: String },
    #[error("parameter '{name}' expects {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: ParameterKind,
        found: &'static str,
    },
    #[error("invalid value for parameter '{name}'")]
    InvalidValue {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Value type accepted by a configuration parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    String,
    Integer,
    Decimal,
    Boolean,
    /// Free-form JSON object or array.
    Structured,
}

impl ParameterKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Decimal => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Structured => value.is_object() || value.is_array(),
        }
    }
}

impl std::fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Structured => "object or array",
        })
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "decimal",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One declared configuration parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,
    pub kind: ParameterKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ParameterDef {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            description: String::new(),
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Parameters a microservice accepts, used to validate raw configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationModel {
    parameters: Vec<ParameterDef>,
}

impl ConfigurationModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_parameter(mut self, parameter: ParameterDef) -> Self {
        self.parameters.push(parameter);
        self
    }

    #[must_use]
    pub fn parameters(&self) -> &[ParameterDef] {
        &self.parameters
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Validate `raw` against the model and fill in defaults.
    ///
    /// `None` and `null` are treated as an empty object.
    ///
    /// # Errors
    /// Unknown keys, missing required parameters and type mismatches.
    pub fn resolve(&self, raw: Option<&Value>) -> Result<ResolvedConfig, ConfigError> {
        let empty = serde_json::Map::new();
        let supplied = match raw {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(ConfigError::NotAnObject {
                    found: json_type(other),
                });
            }
        };

        if let Some(name) = supplied.keys().find(|k| self.parameter(k).is_none()) {
            return Err(ConfigError::Unknown { name: name.clone() });
        }

        let mut values = BTreeMap::new();
        for param in &self.parameters {
            let value = match supplied.get(&param.name).or(param.default.as_ref()) {
                Some(v) => v,
                None if param.required => {
                    return Err(ConfigError::Missing {
                        name: param.name.clone(),
                    });
                }
                None => continue,
            };
            if !param.kind.accepts(value) {
                return Err(ConfigError::TypeMismatch {
                    name: param.name.clone(),
                    expected: param.kind,
                    found: json_type(value),
                });
            }
            values.insert(param.name.clone(), value.clone());
        }

        Ok(ResolvedConfig { values })
    }
}

/// Validated configuration handed to microservice definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResolvedConfig {
    values: BTreeMap<String, Value>,
}

impl ResolvedConfig {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    #[must_use]
    pub fn raw(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Typed value of a present parameter.
    ///
    /// # Errors
    /// `Missing` if absent, `InvalidValue` if it does not deserialize into `T`.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, ConfigError> {
        let value = self.values.get(name).ok_or_else(|| ConfigError::Missing {
            name: name.to_owned(),
        })?;
        serde_json::from_value(value.clone()).map_err(|source| ConfigError::InvalidValue {
            name: name.to_owned(),
            source,
        })
    }

    /// Like [`Self::get`] but absent parameters yield `None`.
    ///
    /// # Errors
    /// `InvalidValue` if the parameter is present but does not deserialize into `T`.
    pub fn get_opt<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ConfigError> {
        if self.contains(name) {
            self.get(name).map(Some)
        } else {
            Ok(None)
        }
    }
}
