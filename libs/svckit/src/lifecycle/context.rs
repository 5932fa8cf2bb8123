use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::progress::{ProgressEvent, ProgressMonitor, TracingProgressMonitor};

/// Execution context handed to every lifecycle hook.
///
/// Carries the cooperative cancellation token, the progress sink, and the
/// identifier of the owner that scheduled the hook. The owner is informational
/// (logs and progress events); it does not imply a structural back-reference.
#[derive(Clone)]
pub struct LifecycleCtx {
    cancel: CancellationToken,
    monitor: Arc<dyn ProgressMonitor>,
    owner: Option<Arc<str>>,
}

impl LifecycleCtx {
    #[must_use]
    pub fn new(cancel: CancellationToken, monitor: Arc<dyn ProgressMonitor>) -> Self {
        Self {
            cancel,
            monitor,
            owner: None,
        }
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn monitor(&self) -> &Arc<dyn ProgressMonitor> {
        &self.monitor
    }

    pub fn report(&self, event: ProgressEvent) {
        self.monitor.report(event);
    }

    /// Identifier of the component that scheduled the current hook.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Same cancellation and monitor, attributed to `owner`.
    #[must_use]
    pub fn for_owner(&self, owner: &str) -> Self {
        Self {
            cancel: self.cancel.clone(),
            monitor: self.monitor.clone(),
            owner: Some(Arc::from(owner)),
        }
    }
}

impl Default for LifecycleCtx {
    fn default() -> Self {
        Self::new(CancellationToken::new(), Arc::new(TracingProgressMonitor))
    }
}

impl std::fmt::Debug for LifecycleCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCtx")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}
