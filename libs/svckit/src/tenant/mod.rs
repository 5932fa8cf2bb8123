//! Per-tenant runtime state.

mod registry;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::composite::{CompositeStep, StepReport};
use crate::error::LifecycleError;
use crate::lifecycle::{
    ComponentSlot, Lifecycle, LifecycleComponent, LifecycleCtx, LifecyclePhase, LifecycleState,
    Transition,
};

pub(crate) use registry::TenantRegistry;

/// Opaque tenant identifier. Serialized as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId(Arc<str>);

impl TenantId {
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for TenantId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TenantId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TenantId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Tenant descriptor delivered by the tenant assignment source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    #[serde(default)]
    pub name: String,
}

impl Tenant {
    #[must_use]
    pub fn new(id: impl Into<TenantId>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Runtime container for everything one tenant needs inside one microservice.
///
/// The engine is itself a lifecycle component: its hooks run nested
/// composite steps over the components the microservice definition supplied.
pub struct TenantEngine {
    tenant: Tenant,
    microservice: Arc<str>,
    lifecycle: Lifecycle,
    components: Vec<ComponentSlot>,
}

impl TenantEngine {
    #[must_use]
    pub fn new(microservice: &str, tenant: Tenant, components: Vec<ComponentSlot>) -> Self {
        let id = format!("{microservice}/{}", tenant.id);
        Self {
            tenant,
            microservice: Arc::from(microservice),
            lifecycle: Lifecycle::new(id),
            components,
        }
    }

    #[must_use]
    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    #[must_use]
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant.id
    }

    /// Identifier of the owning microservice.
    #[must_use]
    pub fn microservice_id(&self) -> &str {
        &self.microservice
    }

    #[must_use]
    pub fn components(&self) -> &[ComponentSlot] {
        &self.components
    }

    fn initialize_step(&self) -> CompositeStep {
        let mut step = CompositeStep::new(format!("Initialize tenant {}", self.tenant.id));
        for slot in &self.components {
            step.add_initialize_step(self.id(), slot.component.clone(), slot.required);
        }
        step
    }

    fn start_step(&self) -> CompositeStep {
        let mut step = CompositeStep::new(format!("Start tenant {}", self.tenant.id));
        for slot in &self.components {
            step.add_start_step(self.id(), slot.component.clone(), slot.required);
        }
        step
    }

    /// Stop step over the started components only, in reverse declaration order.
    fn release_step(&self) -> CompositeStep {
        let mut step = CompositeStep::new(format!("Stop tenant {}", self.tenant.id));
        for slot in self.components.iter().rev() {
            if slot.component.state() == LifecycleState::Started {
                step.add_stop_step(self.id(), slot.component.clone());
            }
        }
        step
    }

    /// Release the engine from whatever state it is in.
    ///
    /// A started engine goes through its stop transition and ends `Stopped`
    /// (or `Errored` if some component failed to stop). Any other engine only
    /// has its started components stopped; its own state is left unchanged.
    pub async fn teardown(&self, ctx: &LifecycleCtx) -> StepReport {
        match self.lifecycle.begin(LifecyclePhase::Stop) {
            Ok(Transition::AlreadyDone) => {
                StepReport::new(format!("Stop tenant {}", self.tenant.id))
            }
            Ok(Transition::Proceed) => {
                let report = self.release_step().execute_best_effort(ctx).await;
                if report.is_clean() {
                    self.lifecycle.finish(LifecyclePhase::Stop);
                } else {
                    self.lifecycle.fail();
                }
                report
            }
            Err(_) => {
                tracing::debug!(
                    engine = self.id(),
                    state = %self.state(),
                    "engine not started; releasing started components only"
                );
                self.release_step().execute_best_effort(ctx).await
            }
        }
    }
}

#[async_trait]
impl LifecycleComponent for TenantEngine {
    fn id(&self) -> &str {
        self.lifecycle.id()
    }

    fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    async fn initialize(&self, ctx: &LifecycleCtx) -> Result<(), LifecycleError> {
        let step = self.initialize_step();
        self.lifecycle
            .drive_composite(LifecyclePhase::Initialize, || async move {
                step.execute(ctx).await.map(drop)
            })
            .await
    }

    async fn start(&self, ctx: &LifecycleCtx) -> Result<(), LifecycleError> {
        let step = self.start_step();
        self.lifecycle
            .drive_composite(LifecyclePhase::Start, || async move {
                step.execute(ctx).await.map(drop)
            })
            .await
    }

    /// Stops every component, then reports whether all of them stopped cleanly.
    async fn stop(&self, ctx: &LifecycleCtx) -> Result<(), LifecycleError> {
        if self.state() != LifecycleState::Started && self.state() != LifecycleState::Stopped {
            return Err(LifecycleError::InvalidTransition {
                component: self.id().to_owned(),
                phase: LifecyclePhase::Stop,
                state: self.state(),
            });
        }
        let report = self.teardown(ctx).await;
        if report.is_clean() {
            Ok(())
        } else {
            Err(LifecycleError::StopIncomplete {
                component: self.id().to_owned(),
                failures: report.failures().len(),
            })
        }
    }
}

impl fmt::Debug for TenantEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantEngine")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("components", &self.components)
            .finish_non_exhaustive()
    }
}
