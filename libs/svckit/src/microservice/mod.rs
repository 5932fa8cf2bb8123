//! Top-level orchestrator for one microservice process.
//!
//! Phases:
//!   - initialize: build API channels and global components, run `Initialize {name}`
//!   - start:      run `Start {name}`, then the post-start hook (readiness wait)
//!   - stop:       cancel waits, stop tenant engines concurrently, run `Stop {name}` in reverse
//!
//! Tenant engines are assigned and removed while the microservice is started.

mod definition;

use std::future::Future;
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::channel::ApiChannel;
use crate::composite::{CompositeStep, StepReport};
use crate::config::{LifecycleConfig, ResolvedConfig};
use crate::error::LifecycleError;
use crate::lifecycle::{
    ComponentSlot, Lifecycle, LifecycleComponent, LifecycleCtx, LifecyclePhase, LifecycleState,
    Transition,
};
use crate::progress::{ProgressEvent, ProgressMonitor, ProgressStatus, TracingProgressMonitor};
use crate::tenant::{Tenant, TenantEngine, TenantId, TenantRegistry};

pub use definition::MicroserviceDefinition;

/// Outcome of the post-start readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Not started yet, or the post-start hook is still running.
    Pending,
    Ready,
    /// Started while a required API was unreachable.
    Degraded,
}

pub struct Microservice {
    definition: Arc<dyn MicroserviceDefinition>,
    lifecycle: Lifecycle,
    settings: LifecycleConfig,
    config: ResolvedConfig,
    ctx: LifecycleCtx,
    lifecycle_lock: tokio::sync::Mutex<()>,
    apis: RwLock<Vec<Arc<ApiChannel>>>,
    globals: RwLock<Vec<ComponentSlot>>,
    readiness: Mutex<Readiness>,
    tenants: TenantRegistry,
    /// Assignments and removals in flight; stop waits for them before releasing globals.
    tenant_ops: TaskTracker,
}

/// Builder for [`Microservice`].
pub struct MicroserviceBuilder {
    definition: Arc<dyn MicroserviceDefinition>,
    settings: LifecycleConfig,
    config: ResolvedConfig,
    monitor: Arc<dyn ProgressMonitor>,
    cancel: CancellationToken,
}

impl MicroserviceBuilder {
    #[must_use]
    pub fn with_lifecycle_config(mut self, settings: LifecycleConfig) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ResolvedConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_progress_monitor(mut self, monitor: Arc<dyn ProgressMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Token cancelled by [`Microservice::stop`]; readiness waits and pending steps observe it.
    #[must_use]
    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn build(self) -> Microservice {
        Microservice {
            lifecycle: Lifecycle::new(self.definition.identifier()),
            definition: self.definition,
            settings: self.settings,
            config: self.config,
            ctx: LifecycleCtx::new(self.cancel, self.monitor),
            lifecycle_lock: tokio::sync::Mutex::new(()),
            apis: RwLock::new(Vec::new()),
            globals: RwLock::new(Vec::new()),
            readiness: Mutex::new(Readiness::Pending),
            tenants: TenantRegistry::default(),
            tenant_ops: TaskTracker::new(),
        }
    }
}

impl Microservice {
    #[must_use]
    pub fn builder(definition: Arc<dyn MicroserviceDefinition>) -> MicroserviceBuilder {
        MicroserviceBuilder {
            definition,
            settings: LifecycleConfig::default(),
            config: ResolvedConfig::empty(),
            monitor: Arc::new(TracingProgressMonitor),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    #[must_use]
    pub fn identifier(&self) -> &str {
        self.definition.identifier()
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        self.definition.is_global()
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    #[must_use]
    pub fn readiness(&self) -> Readiness {
        *self.readiness.lock()
    }

    /// `true` when start completed while a required API was unreachable.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.readiness() == Readiness::Degraded
    }

    #[must_use]
    pub fn settings(&self) -> &LifecycleConfig {
        &self.settings
    }

    #[must_use]
    pub fn configuration(&self) -> &ResolvedConfig {
        &self.config
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        self.ctx.cancellation_token()
    }

    #[must_use]
    pub fn api_channels(&self) -> Vec<Arc<ApiChannel>> {
        self.apis.read().clone()
    }

    #[must_use]
    pub fn api_channel(&self, target: &str) -> Option<Arc<ApiChannel>> {
        self.apis.read().iter().find(|c| c.target() == target).cloned()
    }

    /// Build channels and global components, then initialize them in order.
    ///
    /// # Errors
    /// `ComponentsBuild` if the definition cannot build its components,
    /// `StepAborted` if a required component fails; the microservice is then `Errored`.
    pub async fn initialize(&self) -> Result<(), LifecycleError> {
        let _guard = self.lifecycle_lock.lock().await;
        let span =
            tracing::info_span!("microservice_initialize", microservice = %self.identifier());

        self.lifecycle
            .drive_composite(LifecyclePhase::Initialize, || self.initialize_components())
            .instrument(span)
            .await
    }

    async fn initialize_components(&self) -> Result<(), LifecycleError> {
        tracing::info!("Phase: initialize");
        let apis = self
            .definition
            .build_api_channels(&self.config)
            .map_err(|source| self.build_error(source))?;
        let globals = self
            .definition
            .global_components(&self.config)
            .map_err(|source| self.build_error(source))?;

        let mut step = CompositeStep::new(format!("Initialize {}", self.name()));
        for api in &apis {
            step.add_initialize_step(self.identifier(), api.clone(), true);
        }
        for slot in &globals {
            step.add_initialize_step(self.identifier(), slot.component.clone(), slot.required);
        }
        *self.apis.write() = apis;
        *self.globals.write() = globals;

        let report = step.execute(&self.ctx).await?;
        tracing::info!(
            actions = report.executed(),
            skipped = report.failures().len(),
            "microservice initialized"
        );
        Ok(())
    }

    /// Start channels and global components, then run the post-start hook.
    ///
    /// A failing post-start hook (e.g. a required API that never became
    /// reachable) does not fail start: the microservice stays `Started` and is
    /// flagged degraded.
    ///
    /// # Errors
    /// `InvalidTransition` if not initialized, `StepAborted` if a required component
    /// fails to start.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        let _guard = self.lifecycle_lock.lock().await;
        let span = tracing::info_span!("microservice_start", microservice = %self.identifier());

        async {
            let already_started = self.state() == LifecycleState::Started;
            self.lifecycle
                .drive_composite(LifecyclePhase::Start, || self.start_components())
                .await?;

            if already_started {
                return Ok(());
            }
            self.after_started().await;
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn start_components(&self) -> Result<(), LifecycleError> {
        tracing::info!("Phase: start");
        let globals = self.globals.read().clone();
        let mut step = CompositeStep::new(format!("Start {}", self.name()));
        for api in self.api_channels() {
            step.add_start_step(self.identifier(), api, true);
        }
        for slot in &globals {
            step.add_start_step(self.identifier(), slot.component.clone(), slot.required);
        }
        step.execute(&self.ctx).await.map(drop)
    }

    async fn after_started(&self) {
        tracing::info!("Phase: after start");
        match self.definition.after_started(self).await {
            Ok(()) => {
                *self.readiness.lock() = Readiness::Ready;
                tracing::info!("All required APIs detected as available");
            }
            Err(err) => {
                *self.readiness.lock() = Readiness::Degraded;
                tracing::error!(
                    error = %err,
                    cancelled = err.is_cancelled(),
                    "Required APIs not available; microservice started in degraded state"
                );
                self.ctx.report(ProgressEvent {
                    step: format!("After start {}", self.name()),
                    component: err.component().unwrap_or(self.identifier()).to_owned(),
                    phase: LifecyclePhase::Start,
                    status: ProgressStatus::Failed,
                    message: format!("degraded start: {err}"),
                });
            }
        }
    }

    /// Wait until every API channel answers a probe. Channels are awaited concurrently.
    ///
    /// # Errors
    /// The first `ApiNotAvailable` or `Cancelled` error; other waits are dropped.
    pub async fn wait_for_apis_available(&self) -> Result<(), LifecycleError> {
        let channels = self.api_channels();
        let timeout = self.settings.api_wait_timeout();
        let poll = self.settings.api_poll_interval();
        let cancel = self.cancellation_token();

        try_join_all(channels.iter().map(|channel| async move {
            let elapsed = channel.wait_for_available(timeout, poll, cancel).await?;
            tracing::info!(
                api = channel.target(),
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "API detected as available"
            );
            Ok::<_, LifecycleError>(())
        }))
        .await?;

        let mut readiness = self.readiness.lock();
        if *readiness == Readiness::Degraded {
            tracing::info!("required APIs recovered after degraded start");
        }
        *readiness = Readiness::Ready;
        Ok(())
    }

    /// Release everything that was started and return the aggregate stop report.
    ///
    /// Tenant assignments and removals still in flight are awaited before global
    /// components and API channels are stopped. Never fails because of component
    /// failures; they are collected in the report.
    pub async fn stop(&self) -> StepReport {
        self.cancellation_token().cancel();
        let _guard = self.lifecycle_lock.lock().await;
        let span = tracing::info_span!("microservice_stop", microservice = %self.identifier());

        async {
            let step_name = format!("Stop {}", self.name());
            let proceed = match self.lifecycle.begin(LifecyclePhase::Stop) {
                Ok(Transition::AlreadyDone) => {
                    tracing::debug!("microservice already stopped");
                    return StepReport::new(step_name);
                }
                Ok(Transition::Proceed) => true,
                Err(_) => {
                    tracing::info!(
                        state = %self.state(),
                        "microservice not started; releasing started components"
                    );
                    false
                }
            };

            tracing::info!("Phase: stop");
            let report = self.release(&step_name).await;
            if proceed {
                if report.is_clean() {
                    self.lifecycle.finish(LifecyclePhase::Stop);
                } else {
                    self.lifecycle.fail();
                }
            }

            if report.is_partial_failure() {
                tracing::warn!(
                    failures = report.failures().len(),
                    executed = report.executed(),
                    "microservice stopped with failures"
                );
            } else {
                tracing::info!(executed = report.executed(), "microservice stopped");
            }
            report
        }
        .instrument(span)
        .await
    }

    async fn release(&self, step_name: &str) -> StepReport {
        let mut report = StepReport::new(step_name);

        let engines = self.tenants.drain();
        if !engines.is_empty() {
            tracing::info!(count = engines.len(), "stopping tenant engines");
            let ctx = self.ctx.for_owner(self.identifier());
            let teardowns = engines.iter().map(|engine| engine.teardown(&ctx));
            for engine_report in join_all(teardowns).await {
                report.merge(engine_report);
            }
        }

        // Engines being replaced, removed or refused publication are still stopping.
        self.tenant_ops.close();
        if !self.tenant_ops.is_empty() {
            tracing::info!(
                in_flight = self.tenant_ops.len(),
                "waiting for in-flight tenant operations"
            );
        }
        self.tenant_ops.wait().await;

        let mut step = CompositeStep::new(step_name);
        let globals = self.globals.read().clone();
        for slot in globals.iter().rev() {
            if slot.component.state() == LifecycleState::Started {
                step.add_stop_step(self.identifier(), slot.component.clone());
            }
        }
        for api in self.api_channels().into_iter().rev() {
            if api.state() == LifecycleState::Started {
                step.add_stop_step(self.identifier(), api);
            }
        }
        report.merge(step.execute_best_effort(&self.ctx).await);
        report
    }

    /// Create, initialize and start the engine for `tenant`, then publish it.
    ///
    /// Idempotent while the existing engine is started. An existing engine in
    /// any other state is torn down and replaced.
    ///
    /// # Errors
    /// `GlobalMicroservice`, `MicroserviceNotStarted`, `TenantEngineFactory`, or
    /// the engine's own initialize/start failure. On failure nothing is registered.
    pub async fn assign_tenant(&self, tenant: Tenant) -> Result<Arc<TenantEngine>, LifecycleError> {
        self.ensure_multitenant()?;
        let tenant_id = tenant.id.clone();
        self.tenant_operation(&tenant_id, self.assign_locked(tenant)).await
    }

    async fn assign_locked(&self, tenant: Tenant) -> Result<Arc<TenantEngine>, LifecycleError> {
        let tenant_id = tenant.id.clone();
        let span = tracing::info_span!(
            "assign_tenant",
            microservice = %self.identifier(),
            tenant = %tenant_id
        );
        async {
            self.ensure_started()?;

            if let Some(existing) = self.tenants.get(&tenant_id) {
                if existing.state() == LifecycleState::Started {
                    tracing::debug!("tenant already assigned");
                    return Ok(existing);
                }
                tracing::warn!(state = %existing.state(), "replacing unhealthy tenant engine");
                self.tenants.remove(&tenant_id);
                log_teardown(&existing.teardown(&self.ctx.for_owner(self.identifier())).await);
            }

            let components = self
                .definition
                .create_tenant_engine(&tenant, &self.config)
                .await
                .map_err(|source| LifecycleError::TenantEngineFactory {
                    tenant: tenant_id.to_string(),
                    source,
                })?;
            let engine = Arc::new(TenantEngine::new(self.identifier(), tenant, components));
            let ctx = self.ctx.for_owner(self.identifier());

            let started = match engine.initialize(&ctx).await {
                Ok(()) => engine.start(&ctx).await,
                Err(err) => Err(err),
            };
            if let Err(err) = started {
                tracing::error!(error = %err, "tenant engine failed to start; tearing down");
                log_teardown(&engine.teardown(&ctx).await);
                return Err(err);
            }

            if let Err(engine) = self.tenants.publish(engine.clone()) {
                tracing::warn!("microservice stopping; discarding freshly started tenant engine");
                log_teardown(&engine.teardown(&ctx).await);
                return Err(LifecycleError::MicroserviceNotStarted {
                    microservice: self.identifier().to_owned(),
                    state: self.state(),
                });
            }

            tracing::info!(components = engine.components().len(), "tenant engine started");
            Ok(engine)
        }
        .instrument(span)
        .await
    }

    /// Unpublish and stop the engine for `tenant_id`. Unknown tenants yield an empty report.
    ///
    /// # Errors
    /// `GlobalMicroservice` on a global microservice.
    pub async fn remove_tenant(&self, tenant_id: &TenantId) -> Result<StepReport, LifecycleError> {
        self.ensure_multitenant()?;
        Ok(self.tenant_operation(tenant_id, self.remove_locked(tenant_id)).await)
    }

    async fn remove_locked(&self, tenant_id: &TenantId) -> StepReport {
        let Some(engine) = self.tenants.remove(tenant_id) else {
            tracing::debug!(tenant = %tenant_id, "no engine for tenant; nothing to remove");
            return StepReport::new(format!("Stop tenant {tenant_id}"));
        };

        let report = engine
            .teardown(&self.ctx.for_owner(self.identifier()))
            .instrument(tracing::info_span!("remove_tenant", tenant = %tenant_id))
            .await;
        log_teardown(&report);
        report
    }

    /// Run `op` under the tenant's lock, tracked so that stop can wait for it.
    async fn tenant_operation<T>(&self, tenant_id: &TenantId, op: impl Future<Output = T>) -> T {
        let outcome = self
            .tenant_ops
            .track_future(async {
                let lock = self.tenants.lock_for(tenant_id);
                let _guard = lock.lock().await;
                op.await
            })
            .await;
        self.tenants.prune_lock(tenant_id);
        outcome
    }

    /// Published engine for `tenant_id`. Only fully started engines are ever returned.
    #[must_use]
    pub fn tenant_engine(&self, tenant_id: &TenantId) -> Option<Arc<TenantEngine>> {
        self.tenants.get(tenant_id)
    }

    /// Tenants with a published engine, sorted.
    #[must_use]
    pub fn tenant_ids(&self) -> Vec<TenantId> {
        self.tenants.tenant_ids()
    }

    #[must_use]
    pub fn tenant_count(&self) -> usize {
        self.tenants.count()
    }

    fn ensure_multitenant(&self) -> Result<(), LifecycleError> {
        if self.is_global() {
            return Err(LifecycleError::GlobalMicroservice {
                microservice: self.identifier().to_owned(),
            });
        }
        Ok(())
    }

    fn ensure_started(&self) -> Result<(), LifecycleError> {
        let state = self.state();
        if state != LifecycleState::Started {
            return Err(LifecycleError::MicroserviceNotStarted {
                microservice: self.identifier().to_owned(),
                state,
            });
        }
        Ok(())
    }

    fn build_error(&self, source: anyhow::Error) -> LifecycleError {
        LifecycleError::ComponentsBuild {
            microservice: self.identifier().to_owned(),
            source,
        }
    }
}

fn log_teardown(report: &StepReport) {
    for failure in report.failures() {
        tracing::warn!(
            component = %failure.component,
            error = %failure.error,
            "failed to stop tenant component"
        );
    }
}

impl std::fmt::Debug for Microservice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Microservice")
            .field("identifier", &self.identifier())
            .field("state", &self.state())
            .field("readiness", &self.readiness())
            .field("tenants", &self.tenant_count())
            .finish_non_exhaustive()
    }
}
