//! Lifecycle state machine shared by every managed component.
//!
//! Forward transitions:
//!
//! ```text
//! Created ──initialize──▶ Initializing ──▶ Initialized
//! Initialized ──start───▶ Starting     ──▶ Started
//! Started ──────stop────▶ Stopping     ──▶ Stopped
//!
//! Initializing | Starting | Stopping ──fault──▶ Errored (terminal for the run)
//! ```
//!
//! Invoking a hook while already in its target state is a no-op.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;

/// Current position of a component in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    Initializing,
    Initialized,
    Starting,
    Started,
    Stopping,
    Stopped,
    Errored,
}

impl LifecycleState {
    /// `true` while a hook is executing.
    #[must_use]
    pub fn is_transitioning(self) -> bool {
        matches!(self, Self::Initializing | Self::Starting | Self::Stopping)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Errored => "errored",
        })
    }
}

/// Lifecycle hook being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Initialize,
    Start,
    Stop,
}

impl LifecyclePhase {
    /// State a component must be in for the hook to run.
    #[must_use]
    pub fn source(self) -> LifecycleState {
        match self {
            Self::Initialize => LifecycleState::Created,
            Self::Start => LifecycleState::Initialized,
            Self::Stop => LifecycleState::Started,
        }
    }

    /// State held while the hook runs.
    #[must_use]
    pub fn in_progress(self) -> LifecycleState {
        match self {
            Self::Initialize => LifecycleState::Initializing,
            Self::Start => LifecycleState::Starting,
            Self::Stop => LifecycleState::Stopping,
        }
    }

    /// State reached when the hook succeeds.
    #[must_use]
    pub fn target(self) -> LifecycleState {
        match self {
            Self::Initialize => LifecycleState::Initialized,
            Self::Start => LifecycleState::Started,
            Self::Stop => LifecycleState::Stopped,
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initialize => "initialize",
            Self::Start => "start",
            Self::Stop => "stop",
        })
    }
}

/// Outcome of [`Lifecycle::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The component moved into the in-progress state; run the hook.
    Proceed,
    /// The component is already in the target state; skip the hook.
    AlreadyDone,
}

/// State cell owned by exactly one component.
///
/// Built-in components ([`crate::ApiChannel`], [`crate::TenantEngine`],
/// [`crate::ManagedComponent`]) embed one and route every hook through
/// [`Lifecycle::drive`] or [`Lifecycle::drive_composite`]. Custom
/// [`crate::LifecycleComponent`] implementations may do the same.
#[derive(Debug)]
pub struct Lifecycle {
    id: Arc<str>,
    state: Mutex<LifecycleState>,
}

impl Lifecycle {
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(LifecycleState::Created),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Atomically validate and enter the in-progress state for `phase`.
    ///
    /// # Errors
    /// Returns [`LifecycleError::InvalidTransition`] when the current state is
    /// neither the phase source nor its target. The state is left untouched.
    pub fn begin(&self, phase: LifecyclePhase) -> Result<Transition, LifecycleError> {
        let mut state = self.state.lock();
        if *state == phase.target() {
            return Ok(Transition::AlreadyDone);
        }
        if *state != phase.source() {
            return Err(LifecycleError::InvalidTransition {
                component: self.id.to_string(),
                phase,
                state: *state,
            });
        }
        *state = phase.in_progress();
        Ok(Transition::Proceed)
    }

    /// Complete a phase started with [`Lifecycle::begin`].
    pub fn finish(&self, phase: LifecyclePhase) {
        let mut state = self.state.lock();
        if *state == phase.in_progress() {
            *state = phase.target();
        }
    }

    /// Mark the component as failed for the remainder of the run.
    pub fn fail(&self) {
        *self.state.lock() = LifecycleState::Errored;
    }

    /// Run a business hook under the state machine.
    ///
    /// A hook error or panic moves the component to `Errored` and surfaces as
    /// [`LifecycleError::HookFailure`].
    ///
    /// # Errors
    /// Returns `InvalidTransition` if the phase is not allowed from the current state,
    /// or `HookFailure` if the hook fails.
    pub async fn drive<F, Fut>(&self, phase: LifecyclePhase, hook: F) -> Result<(), LifecycleError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let component = self.id.clone();
        self.drive_composite(phase, move || async move {
            hook().await.map_err(|source| LifecycleError::HookFailure {
                component: component.to_string(),
                phase,
                source,
            })
        })
        .await
    }

    /// Run a body that already produces typed lifecycle errors (e.g. nested composite steps).
    ///
    /// Errors are propagated unchanged; a panic becomes `HookFailure`.
    ///
    /// # Errors
    /// Returns `InvalidTransition` if the phase is not allowed from the current state,
    /// or the error produced by `body`.
    pub async fn drive_composite<F, Fut>(
        &self,
        phase: LifecyclePhase,
        body: F,
    ) -> Result<(), LifecycleError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), LifecycleError>>,
    {
        if self.begin(phase)? == Transition::AlreadyDone {
            tracing::debug!(component = %self.id, %phase, "already in target state; skipping hook");
            return Ok(());
        }

        let outcome = AssertUnwindSafe(async move { body().await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                self.finish(phase);
                Ok(())
            }
            Ok(Err(err)) => {
                self.fail();
                Err(err)
            }
            Err(payload) => {
                self.fail();
                Err(LifecycleError::HookFailure {
                    component: self.id.to_string(),
                    phase,
                    source: anyhow::anyhow!("hook panicked: {}", panic_message(payload.as_ref())),
                })
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
