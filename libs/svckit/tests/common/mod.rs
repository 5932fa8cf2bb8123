#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use svckit::{
    ApiChannel, ApiTransport, ComponentSlot, ConfigurationModel, LifecycleConfig, LifecycleCtx,
    LifecycleHooks, LifecyclePhase, ManagedComponent, Microservice, MicroserviceDefinition,
    ParameterDef, ParameterKind, ProgressMonitor, ResolvedConfig, Tenant, async_trait,
};

/// Ordered record of hook invocations shared between fixtures.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == entry).count()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Transport whose reachability is flipped by the test.
pub struct SwitchTransport {
    reachable: AtomicBool,
    probes: AtomicUsize,
    journal: Journal,
    name: &'static str,
}

impl SwitchTransport {
    pub fn new(name: &'static str, reachable: bool, journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            reachable: AtomicBool::new(reachable),
            probes: AtomicUsize::new(0),
            journal: journal.clone(),
            name,
        })
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApiTransport for SwitchTransport {
    fn endpoint(&self) -> Option<String> {
        Some(format!("{}.svc:9000", self.name))
    }

    async fn open(&self) -> anyhow::Result<()> {
        self.journal.push(format!("open:{}", self.name));
        Ok(())
    }

    async fn probe(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.reachable.load(Ordering::SeqCst)
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.journal.push(format!("close:{}", self.name));
        Ok(())
    }
}

/// Business component recording each hook into the journal.
pub struct Recorder {
    pub name: String,
    pub journal: Journal,
    pub fail_on: Option<LifecyclePhase>,
    pub panic_on: Option<LifecyclePhase>,
    pub start_delay: Duration,
    pub stop_delay: Duration,
}

impl Recorder {
    pub fn new(name: impl Into<String>, journal: &Journal) -> Self {
        Self {
            name: name.into(),
            journal: journal.clone(),
            fail_on: None,
            panic_on: None,
            start_delay: Duration::ZERO,
            stop_delay: Duration::ZERO,
        }
    }

    pub fn failing_on(mut self, phase: LifecyclePhase) -> Self {
        self.fail_on = Some(phase);
        self
    }

    pub fn panicking_on(mut self, phase: LifecyclePhase) -> Self {
        self.panic_on = Some(phase);
        self
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }

    pub fn into_component(self) -> Arc<ManagedComponent<Recorder>> {
        Arc::new(ManagedComponent::new(self.name.clone(), self))
    }

    fn record(&self, phase: LifecyclePhase) -> anyhow::Result<()> {
        self.journal.push(format!("{phase}:{}", self.name));
        if self.panic_on == Some(phase) {
            panic!("{} exploded during {phase}", self.name);
        }
        if self.fail_on == Some(phase) {
            anyhow::bail!("{} refused to {phase}", self.name);
        }
        Ok(())
    }
}

#[async_trait]
impl LifecycleHooks for Recorder {
    async fn on_initialize(&self, _ctx: &LifecycleCtx) -> anyhow::Result<()> {
        self.record(LifecyclePhase::Initialize)
    }

    async fn on_start(&self, _ctx: &LifecycleCtx) -> anyhow::Result<()> {
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        self.record(LifecyclePhase::Start)
    }

    async fn on_stop(&self, _ctx: &LifecycleCtx) -> anyhow::Result<()> {
        if !self.stop_delay.is_zero() {
            tokio::time::sleep(self.stop_delay).await;
        }
        self.record(LifecyclePhase::Stop)
    }
}

/// Device registration: multitenant, depends on the device-management API.
pub struct DeviceRegistration {
    pub journal: Journal,
    pub device_management: Arc<SwitchTransport>,
    /// Tenants whose engine fails to start.
    pub broken_tenants: Mutex<HashSet<String>>,
    /// Tenants whose engine cannot even be built.
    pub unbuildable_tenants: Mutex<HashSet<String>>,
    /// Tenants whose device cache fails to stop.
    pub fragile_tenants: Mutex<HashSet<String>>,
    pub tenant_start_delay: Duration,
    pub tenant_stop_delay: Duration,
    pub engines_built: AtomicUsize,
}

impl DeviceRegistration {
    pub const IDENTIFIER: &'static str = "device-registration";

    pub fn new(journal: &Journal, reachable: bool) -> Arc<Self> {
        Arc::new(Self::build(journal, reachable, Duration::ZERO, Duration::ZERO))
    }

    pub fn with_tenant_start_delay(journal: &Journal, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(journal, true, delay, Duration::ZERO))
    }

    pub fn with_tenant_stop_delay(journal: &Journal, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(journal, true, Duration::ZERO, delay))
    }

    fn build(
        journal: &Journal,
        reachable: bool,
        start_delay: Duration,
        stop_delay: Duration,
    ) -> Self {
        Self {
            journal: journal.clone(),
            device_management: SwitchTransport::new("device-management", reachable, journal),
            broken_tenants: Mutex::new(HashSet::new()),
            unbuildable_tenants: Mutex::new(HashSet::new()),
            fragile_tenants: Mutex::new(HashSet::new()),
            tenant_start_delay: start_delay,
            tenant_stop_delay: stop_delay,
            engines_built: AtomicUsize::new(0),
        }
    }

    pub fn break_tenant(&self, tenant: &str) {
        self.broken_tenants.lock().insert(tenant.to_owned());
    }

    pub fn heal_tenant(&self, tenant: &str) {
        self.broken_tenants.lock().remove(tenant);
    }
}

#[async_trait]
impl MicroserviceDefinition for DeviceRegistration {
    fn name(&self) -> &str {
        "Device Registration"
    }

    fn identifier(&self) -> &str {
        Self::IDENTIFIER
    }

    fn is_global(&self) -> bool {
        false
    }

    fn configuration_model(&self) -> ConfigurationModel {
        ConfigurationModel::new().with_parameter(
            ParameterDef::new("default_area_token", ParameterKind::String)
                .with_default("unassigned")
                .with_description("Area assigned to devices that register without one"),
        )
    }

    fn build_api_channels(&self, _config: &ResolvedConfig) -> anyhow::Result<Vec<Arc<ApiChannel>>> {
        Ok(vec![Arc::new(ApiChannel::new(
            "device-management",
            self.device_management.clone(),
        ))])
    }

    fn global_components(&self, _config: &ResolvedConfig) -> anyhow::Result<Vec<ComponentSlot>> {
        Ok(vec![ComponentSlot::required(
            Recorder::new("registration-listener", &self.journal).into_component(),
        )])
    }

    async fn create_tenant_engine(
        &self,
        tenant: &Tenant,
        _config: &ResolvedConfig,
    ) -> anyhow::Result<Vec<ComponentSlot>> {
        let id = tenant.id.as_str();
        if self.unbuildable_tenants.lock().contains(id) {
            anyhow::bail!("no registration rules configured for {id}");
        }
        self.engines_built.fetch_add(1, Ordering::SeqCst);

        let mut manager = Recorder::new(format!("registration-manager@{id}"), &self.journal)
            .with_start_delay(self.tenant_start_delay)
            .with_stop_delay(self.tenant_stop_delay);
        if self.broken_tenants.lock().contains(id) {
            manager = manager.failing_on(LifecyclePhase::Start);
        }
        let mut cache = Recorder::new(format!("device-cache@{id}"), &self.journal);
        if self.fragile_tenants.lock().contains(id) {
            cache = cache.failing_on(LifecyclePhase::Stop);
        }
        Ok(vec![
            ComponentSlot::required(cache.into_component()),
            ComponentSlot::required(manager.into_component()),
        ])
    }
}

/// Event search: multitenant, no remote API dependencies.
pub struct EventSearch {
    pub journal: Journal,
}

#[async_trait]
impl MicroserviceDefinition for EventSearch {
    fn name(&self) -> &str {
        "Event Search"
    }

    fn identifier(&self) -> &str {
        "event-search"
    }

    fn is_global(&self) -> bool {
        false
    }

    async fn create_tenant_engine(
        &self,
        tenant: &Tenant,
        _config: &ResolvedConfig,
    ) -> anyhow::Result<Vec<ComponentSlot>> {
        Ok(vec![ComponentSlot::required(
            Recorder::new(format!("search-provider@{}", tenant.id), &self.journal).into_component(),
        )])
    }
}

/// Instance management: global, never hosts tenant engines.
pub struct InstanceManagement {
    pub journal: Journal,
}

#[async_trait]
impl MicroserviceDefinition for InstanceManagement {
    fn name(&self) -> &str {
        "Instance Management"
    }

    fn identifier(&self) -> &str {
        "instance-management"
    }

    fn is_global(&self) -> bool {
        true
    }

    fn global_components(&self, _config: &ResolvedConfig) -> anyhow::Result<Vec<ComponentSlot>> {
        Ok(vec![
            ComponentSlot::required(Recorder::new("bootstrapper", &self.journal).into_component()),
            ComponentSlot::optional(
                Recorder::new("metrics-exporter", &self.journal)
                    .failing_on(LifecyclePhase::Start)
                    .into_component(),
            ),
        ])
    }
}

pub fn fast_timing() -> LifecycleConfig {
    LifecycleConfig {
        api_wait_timeout_ms: 2_000,
        api_poll_interval_ms: 100,
    }
}

pub fn microservice(
    definition: Arc<dyn MicroserviceDefinition>,
    monitor: Arc<dyn ProgressMonitor>,
) -> Arc<Microservice> {
    Arc::new(
        Microservice::builder(definition)
            .with_lifecycle_config(fast_timing())
            .with_progress_monitor(monitor)
            .build(),
    )
}

pub async fn started(
    definition: Arc<dyn MicroserviceDefinition>,
    monitor: Arc<dyn ProgressMonitor>,
) -> Arc<Microservice> {
    let ms = microservice(definition, monitor);
    ms.initialize().await.unwrap();
    ms.start().await.unwrap();
    ms
}
