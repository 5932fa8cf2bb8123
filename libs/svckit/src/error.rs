//! Typed failures raised by the lifecycle orchestrator.
//!
//! Hook implementations and microservice definitions return `anyhow::Result`;
//! the orchestrator wraps those causes into [`LifecycleError`] so callers can
//! match on *where* a failure happened (which component, which phase) without
//! knowing the concrete business error.

use std::time::Duration;

use crate::lifecycle::{LifecyclePhase, LifecycleState};

/// Failure of a lifecycle operation.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// A lifecycle hook returned an error or panicked. The component is `Errored`.
    #[error("component '{component}' failed to {phase}: {source}")]
    HookFailure {
        component: String,
        phase: LifecyclePhase,
        #[source]
        source: anyhow::Error,
    },

    /// A readiness wait ran out of time before the remote API answered a probe.
    #[error("api '{target}' not available after {}ms", elapsed.as_millis())]
    ApiNotAvailable { target: String, elapsed: Duration },

    /// A required initialize/start action failed and the remaining actions were skipped.
    #[error("composite step '{step}' aborted: required component '{component}' failed")]
    StepAborted {
        step: String,
        component: String,
        #[source]
        source: Box<LifecycleError>,
    },

    /// A hook was invoked from a state that does not allow it.
    #[error("component '{component}' cannot {phase} from state {state}")]
    InvalidTransition {
        component: String,
        phase: LifecyclePhase,
        state: LifecycleState,
    },

    /// Cooperative cancellation interrupted a step or a readiness wait.
    #[error("'{component}' interrupted by cancellation")]
    Cancelled { component: String },

    /// Tenant operations are not available on a global microservice.
    #[error("microservice '{microservice}' is global and does not manage tenant engines")]
    GlobalMicroservice { microservice: String },

    /// The microservice definition could not build the engine for a tenant.
    #[error("failed to create tenant engine for '{tenant}': {source}")]
    TenantEngineFactory {
        tenant: String,
        #[source]
        source: anyhow::Error,
    },

    /// The microservice definition could not build its API channels or global components.
    #[error("microservice '{microservice}' failed to build components: {source}")]
    ComponentsBuild {
        microservice: String,
        #[source]
        source: anyhow::Error,
    },

    /// Tenant assignment requires a started microservice.
    #[error("microservice '{microservice}' is {state}; tenant operations require it to be started")]
    MicroserviceNotStarted {
        microservice: String,
        state: LifecycleState,
    },

    /// A stop sequence ran to completion but some of its actions failed.
    #[error("component '{component}' stopped with {failures} failed action(s)")]
    StopIncomplete { component: String, failures: usize },
}

impl LifecycleError {
    /// Identifier of the component the failure is attributed to, if any.
    #[must_use]
    pub fn component(&self) -> Option<&str> {
        match self {
            Self::HookFailure { component, .. }
            | Self::StepAborted { component, .. }
            | Self::InvalidTransition { component, .. }
            | Self::Cancelled { component }
            | Self::StopIncomplete { component, .. } => Some(component),
            Self::ApiNotAvailable { target, .. } => Some(target),
            Self::GlobalMicroservice { microservice }
            | Self::ComponentsBuild { microservice, .. }
            | Self::MicroserviceNotStarted { microservice, .. } => Some(microservice),
            Self::TenantEngineFactory { tenant, .. } => Some(tenant),
        }
    }

    /// Innermost failure, unwrapping nested [`LifecycleError::StepAborted`] layers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::StepAborted { source, .. } => source.root(),
            other => other,
        }
    }

    /// `true` when the failure is (or wraps) a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled { .. })
    }
}
