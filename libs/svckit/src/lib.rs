#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Lifecycle orchestration core for multi-tenant microservices.
//!
//! - [`LifecycleComponent`]: the initialize/start/stop contract and its state machine
//! - [`CompositeStep`]: ordered execution of lifecycle actions with per-action failure policy
//! - [`ApiChannel`]: channels to remote APIs with readiness waiting
//! - [`TenantEngine`]: per-tenant runtime built from microservice-provided components
//! - [`Microservice`]: the orchestrator tying all of the above together

pub mod channel;
pub mod composite;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod microservice;
pub mod progress;
pub mod tenant;

pub use channel::{ApiChannel, ApiTransport, TcpProbeTransport};
pub use composite::{CompositeStep, StepFailure, StepReport};
pub use config::{
    ConfigError, ConfigurationModel, LifecycleConfig, ParameterDef, ParameterKind, ResolvedConfig,
};
pub use error::LifecycleError;
pub use lifecycle::{
    ComponentSlot, Lifecycle, LifecycleComponent, LifecycleCtx, LifecycleHooks, LifecyclePhase,
    LifecycleState, ManagedComponent,
};
pub use microservice::{Microservice, MicroserviceBuilder, MicroserviceDefinition, Readiness};
pub use progress::{
    ChannelProgressMonitor, FanoutProgressMonitor, ProgressEvent, ProgressMonitor, ProgressStatus,
    RecordingProgressMonitor, TracingProgressMonitor,
};
pub use tenant::{Tenant, TenantEngine, TenantId};

// Re-exported so definitions and hooks share the runtime's dependency versions.
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
