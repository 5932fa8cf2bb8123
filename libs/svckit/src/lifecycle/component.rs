use std::sync::Arc;

use async_trait::async_trait;

use super::{Lifecycle, LifecycleCtx, LifecyclePhase, LifecycleState};
use crate::error::LifecycleError;

/// Capability shared by every managed unit: channels, tenant engines, global
/// services and microservice-provided components.
///
/// Implementations own their state; callers observe it through [`Self::state`]
/// and drive it only through the three hooks.
#[async_trait]
pub trait LifecycleComponent: Send + Sync + 'static {
    /// Stable identifier used in logs, progress events and errors.
    fn id(&self) -> &str;

    fn state(&self) -> LifecycleState;

    /// Acquire resources. Allowed from `Created`; a no-op when `Initialized`.
    ///
    /// # Errors
    /// `InvalidTransition` from any other state, `HookFailure` if business setup fails.
    async fn initialize(&self, ctx: &LifecycleCtx) -> Result<(), LifecycleError>;

    /// Begin serving. Allowed from `Initialized`; a no-op when `Started`.
    ///
    /// # Errors
    /// `InvalidTransition` from any other state, `HookFailure` if business start fails.
    async fn start(&self, ctx: &LifecycleCtx) -> Result<(), LifecycleError>;

    /// Release resources. Allowed from `Started`; a no-op when `Stopped`.
    ///
    /// # Errors
    /// `InvalidTransition` from any other state, `HookFailure` if business teardown fails.
    async fn stop(&self, ctx: &LifecycleCtx) -> Result<(), LifecycleError>;

    /// Dispatch to the hook for `phase`.
    ///
    /// # Errors
    /// Whatever the dispatched hook returns.
    async fn run_phase(
        &self,
        phase: LifecyclePhase,
        ctx: &LifecycleCtx,
    ) -> Result<(), LifecycleError> {
        match phase {
            LifecyclePhase::Initialize => self.initialize(ctx).await,
            LifecyclePhase::Start => self.start(ctx).await,
            LifecyclePhase::Stop => self.stop(ctx).await,
        }
    }
}

/// Business hooks for [`ManagedComponent`]. Every hook defaults to a no-op.
#[async_trait]
pub trait LifecycleHooks: Send + Sync + 'static {
    /// # Errors
    /// Any error moves the owning component to `Errored`.
    async fn on_initialize(&self, _ctx: &LifecycleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    /// # Errors
    /// Any error moves the owning component to `Errored`.
    async fn on_start(&self, _ctx: &LifecycleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    /// # Errors
    /// Any error moves the owning component to `Errored`.
    async fn on_stop(&self, _ctx: &LifecycleCtx) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Adapter that puts plain [`LifecycleHooks`] under the lifecycle state machine.
pub struct ManagedComponent<H> {
    lifecycle: Lifecycle,
    hooks: H,
}

impl<H: LifecycleHooks> ManagedComponent<H> {
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>, hooks: H) -> Self {
        Self {
            lifecycle: Lifecycle::new(id),
            hooks,
        }
    }

    #[must_use]
    pub fn hooks(&self) -> &H {
        &self.hooks
    }
}

#[async_trait]
impl<H: LifecycleHooks> LifecycleComponent for ManagedComponent<H> {
    fn id(&self) -> &str {
        self.lifecycle.id()
    }

    fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    async fn initialize(&self, ctx: &LifecycleCtx) -> Result<(), LifecycleError> {
        self.lifecycle
            .drive(LifecyclePhase::Initialize, || self.hooks.on_initialize(ctx))
            .await
    }

    async fn start(&self, ctx: &LifecycleCtx) -> Result<(), LifecycleError> {
        self.lifecycle
            .drive(LifecyclePhase::Start, || self.hooks.on_start(ctx))
            .await
    }

    async fn stop(&self, ctx: &LifecycleCtx) -> Result<(), LifecycleError> {
        self.lifecycle
            .drive(LifecyclePhase::Stop, || self.hooks.on_stop(ctx))
            .await
    }
}

/// A component together with its failure policy inside a composite step.
#[derive(Clone)]
pub struct ComponentSlot {
    pub component: Arc<dyn LifecycleComponent>,
    /// A failing required component aborts initialize/start; an optional one is logged and skipped.
    pub required: bool,
}

impl ComponentSlot {
    #[must_use]
    pub fn required(component: Arc<dyn LifecycleComponent>) -> Self {
        Self {
            component,
            required: true,
        }
    }

    #[must_use]
    pub fn optional(component: Arc<dyn LifecycleComponent>) -> Self {
        Self {
            component,
            required: false,
        }
    }
}

impl std::fmt::Debug for ComponentSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentSlot")
            .field("component", &self.component.id())
            .field("state", &self.component.state())
            .field("required", &self.required)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        starts: AtomicUsize,
    }

    #[async_trait]
    impl LifecycleHooks for Counting {
        async fn on_start(&self, _ctx: &LifecycleCtx) -> anyhow::Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn managed_component_runs_hooks_once() {
        let ctx = LifecycleCtx::default();
        let comp = ManagedComponent::new("audit-log", Counting::default());

        comp.initialize(&ctx).await.unwrap();
        comp.start(&ctx).await.unwrap();
        comp.start(&ctx).await.unwrap();

        assert_eq!(comp.state(), LifecycleState::Started);
        assert_eq!(comp.hooks().starts.load(Ordering::SeqCst), 1);

        comp.run_phase(LifecyclePhase::Stop, &ctx).await.unwrap();
        assert_eq!(comp.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn start_without_initialize_is_rejected() {
        let ctx = LifecycleCtx::default();
        let comp = ManagedComponent::new("audit-log", Counting::default());

        let err = comp.start(&ctx).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
        assert_eq!(comp.hooks().starts.load(Ordering::SeqCst), 0);
        assert_eq!(comp.state(), LifecycleState::Created);
    }
}
