#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Process bootstrap for `svckit` microservices.
//!
//! Typical host:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # async fn host(definition: Arc<dyn svckit::MicroserviceDefinition>) -> anyhow::Result<()> {
//! use svckit_bootstrap::{AppConfig, RunOptions, ShutdownOptions, init_logging, run};
//!
//! let config = AppConfig::load_layered(Some(std::path::Path::new("config/svc.yaml")))?;
//! init_logging(&config.logging)?;
//! let microservice = Arc::new(config.microservice_builder(definition)?.build());
//! let report = run(microservice, RunOptions::new(ShutdownOptions::Signals)).await?;
//! # drop(report);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod run;
pub mod signals;

pub use config::{AppConfig, ENV_PREFIX, LogFormat, LoggingConfig};
pub use logging::init_logging;
pub use run::{RunOptions, ShutdownOptions, TenantEvent, run};
pub use signals::{ShutdownSignal, wait_for_shutdown};
