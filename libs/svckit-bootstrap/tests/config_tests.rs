#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Layered configuration: defaults, YAML file, environment overrides.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use svckit::{
    ConfigError, ConfigurationModel, MicroserviceDefinition, ParameterDef, ParameterKind,
    async_trait,
};
use svckit_bootstrap::{AppConfig, LogFormat};

const OVERRIDES: [&str; 3] = [
    "SVCKIT__LIFECYCLE__API_WAIT_TIMEOUT_MS",
    "SVCKIT__LIFECYCLE__API_POLL_INTERVAL_MS",
    "SVCKIT__LOGGING__LEVEL",
];

/// Load with no `SVCKIT__*` overrides leaking in from other tests.
fn load_isolated(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    temp_env::with_vars_unset(OVERRIDES, || AppConfig::load_layered(path))
}

fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn defaults_apply_without_file_or_env() {
    let cfg = load_isolated(None).unwrap();
    assert_eq!(cfg.lifecycle.api_wait_timeout_ms, 60_000);
    assert_eq!(cfg.lifecycle.api_poll_interval_ms, 1_000);
    assert_eq!(cfg.logging.level, "info");
    assert_eq!(cfg.logging.format, LogFormat::Text);
}

#[test]
fn yaml_file_overrides_defaults() {
    let file = yaml_file(concat!(
        "lifecycle:\n  api_wait_timeout_ms: 5000\n",
        "logging:\n  format: json\n",
        "microservice:\n  default_area_token: north\n",
    ));

    let cfg = load_isolated(Some(file.path())).unwrap();

    assert_eq!(cfg.lifecycle.api_wait_timeout_ms, 5_000);
    assert_eq!(cfg.lifecycle.api_poll_interval_ms, 1_000);
    assert_eq!(cfg.logging.format, LogFormat::Json);
    assert_eq!(
        cfg.microservice,
        Some(serde_json::json!({"default_area_token": "north"}))
    );
}

#[test]
fn environment_overrides_file() {
    let file = yaml_file("lifecycle:\n  api_wait_timeout_ms: 5000\n");

    temp_env::with_vars(
        [
            ("SVCKIT__LIFECYCLE__API_WAIT_TIMEOUT_MS", Some("750")),
            ("SVCKIT__LOGGING__LEVEL", Some("debug")),
        ],
        || {
            let cfg = AppConfig::load_layered(Some(file.path())).unwrap();
            assert_eq!(cfg.lifecycle.api_wait_timeout_ms, 750);
            assert_eq!(cfg.logging.level, "debug");
        },
    );
}

#[test]
fn missing_file_is_an_error() {
    let err = load_isolated(Some(Path::new("/nonexistent/svckit.yaml"))).unwrap_err();
    assert!(err.to_string().contains("config file not found"), "{err}");
}

#[test]
fn unknown_keys_are_rejected() {
    let file = yaml_file("lifecycle:\n  api_wait_timeout: 5\n");
    assert!(load_isolated(Some(file.path())).is_err());
}

struct AreaService;

#[async_trait]
impl MicroserviceDefinition for AreaService {
    fn name(&self) -> &str {
        "Area Service"
    }

    fn identifier(&self) -> &str {
        "area-service"
    }

    fn is_global(&self) -> bool {
        true
    }

    fn configuration_model(&self) -> ConfigurationModel {
        ConfigurationModel::new()
            .with_parameter(ParameterDef::new("region", ParameterKind::String).required())
            .with_parameter(ParameterDef::new("shards", ParameterKind::Integer).with_default(4))
    }
}

#[test]
fn microservice_builder_resolves_tunables_and_timing() {
    let file = yaml_file(
        "lifecycle:\n  api_poll_interval_ms: 250\nmicroservice:\n  region: eu-west\n",
    );
    let cfg = load_isolated(Some(file.path())).unwrap();

    let ms = cfg.microservice_builder(Arc::new(AreaService)).unwrap().build();

    assert_eq!(ms.settings().api_poll_interval_ms, 250);
    assert_eq!(ms.configuration().get::<String>("region").unwrap(), "eu-west");
    assert_eq!(ms.configuration().get::<i64>("shards").unwrap(), 4);
}

#[test]
fn microservice_builder_reports_missing_parameter() {
    let cfg = AppConfig::default();
    let Err(err) = cfg.microservice_builder(Arc::new(AreaService)) else {
        panic!("missing region must be rejected");
    };
    assert!(matches!(err, ConfigError::Missing { ref name } if name == "region"));
}
