//! Ordered execution of lifecycle actions across many components.
//!
//! A [`CompositeStep`] is a named list of `(component, phase, required)`
//! actions executed sequentially in insertion order:
//!
//! * initialize/start actions marked `required` abort the step on failure;
//!   later actions never run;
//! * optional initialize/start actions and every stop action are best effort:
//!   failures are collected in the [`StepReport`] and execution continues.
//!
//! Cancellation is observed before each initialize/start action. Stop actions
//! always run so resources are released during shutdown.

use std::sync::Arc;

use tracing::Instrument;

use crate::error::LifecycleError;
use crate::lifecycle::{LifecycleComponent, LifecycleCtx, LifecyclePhase};
use crate::progress::{ProgressEvent, ProgressStatus};

struct StepAction {
    owner: Arc<str>,
    component: Arc<dyn LifecycleComponent>,
    phase: LifecyclePhase,
    required: bool,
}

impl StepAction {
    fn aborts_on_failure(&self) -> bool {
        self.required && self.phase != LifecyclePhase::Stop
    }
}

/// Named, ordered sequence of lifecycle actions.
pub struct CompositeStep {
    name: String,
    actions: Vec<StepAction>,
}

impl CompositeStep {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn add_initialize_step(
        &mut self,
        owner: &str,
        component: Arc<dyn LifecycleComponent>,
        required: bool,
    ) -> &mut Self {
        self.push(owner, component, LifecyclePhase::Initialize, required)
    }

    pub fn add_start_step(
        &mut self,
        owner: &str,
        component: Arc<dyn LifecycleComponent>,
        required: bool,
    ) -> &mut Self {
        self.push(owner, component, LifecyclePhase::Start, required)
    }

    /// Stop actions are always best effort.
    pub fn add_stop_step(
        &mut self,
        owner: &str,
        component: Arc<dyn LifecycleComponent>,
    ) -> &mut Self {
        self.push(owner, component, LifecyclePhase::Stop, false)
    }

    fn push(
        &mut self,
        owner: &str,
        component: Arc<dyn LifecycleComponent>,
        phase: LifecyclePhase,
        required: bool,
    ) -> &mut Self {
        self.actions.push(StepAction {
            owner: Arc::from(owner),
            component,
            phase,
            required,
        });
        self
    }

    /// Execute every action in insertion order.
    ///
    /// # Errors
    /// Returns [`LifecycleError::StepAborted`] when a required initialize/start
    /// action fails or cancellation is observed; the source is the underlying
    /// failure. Best-effort failures never produce an error; inspect the report.
    pub async fn execute(&self, ctx: &LifecycleCtx) -> Result<StepReport, LifecycleError> {
        let span = tracing::info_span!(
            "composite_step",
            step = %self.name,
            actions = self.actions.len()
        );
        self.run(ctx).instrument(span).await
    }

    /// Execute a step expected to contain only best-effort actions, folding an
    /// unexpected abort into the returned report.
    pub async fn execute_best_effort(&self, ctx: &LifecycleCtx) -> StepReport {
        match self.execute(ctx).await {
            Ok(report) => report,
            Err(error) => {
                let mut report = StepReport::new(&self.name);
                report.failures.push(StepFailure {
                    step: self.name.clone(),
                    index: self.actions.len(),
                    component: error.component().unwrap_or(&self.name).to_owned(),
                    phase: LifecyclePhase::Stop,
                    error,
                });
                report
            }
        }
    }

    async fn run(&self, ctx: &LifecycleCtx) -> Result<StepReport, LifecycleError> {
        let mut report = StepReport::new(&self.name);

        for (index, action) in self.actions.iter().enumerate() {
            let component = action.component.id().to_owned();

            if action.phase != LifecyclePhase::Stop && ctx.is_cancelled() {
                let error = LifecycleError::Cancelled {
                    component: component.clone(),
                };
                self.emit(ctx, action, ProgressStatus::Failed, error.to_string());
                tracing::info!(
                    component = %component,
                    index,
                    "cancellation observed; aborting step"
                );
                return Err(self.abort(component, error));
            }

            self.emit(
                ctx,
                action,
                ProgressStatus::Started,
                format!("{} {component}", verb(action.phase)),
            );
            report.executed += 1;

            let action_ctx = ctx.for_owner(&action.owner);
            match action.component.run_phase(action.phase, &action_ctx).await {
                Ok(()) => {
                    self.emit(
                        ctx,
                        action,
                        ProgressStatus::Succeeded,
                        format!("{component} {}", action.phase.target()),
                    );
                }
                Err(error) => {
                    self.emit(ctx, action, ProgressStatus::Failed, error.to_string());
                    if action.aborts_on_failure() {
                        tracing::error!(
                            component = %component,
                            index,
                            error = %error,
                            "required action failed; aborting step"
                        );
                        return Err(self.abort(component, error));
                    }
                    tracing::warn!(
                        component = %component,
                        index,
                        error = %error,
                        "action failed; continuing"
                    );
                    report.failures.push(StepFailure {
                        step: self.name.clone(),
                        index,
                        component,
                        phase: action.phase,
                        error,
                    });
                }
            }
        }

        Ok(report)
    }

    fn abort(&self, component: String, source: LifecycleError) -> LifecycleError {
        LifecycleError::StepAborted {
            step: self.name.clone(),
            component,
            source: Box::new(source),
        }
    }

    fn emit(
        &self,
        ctx: &LifecycleCtx,
        action: &StepAction,
        status: ProgressStatus,
        message: String,
    ) {
        ctx.report(ProgressEvent {
            step: self.name.clone(),
            component: action.component.id().to_owned(),
            phase: action.phase,
            status,
            message,
        });
    }
}

fn verb(phase: LifecyclePhase) -> &'static str {
    match phase {
        LifecyclePhase::Initialize => "initializing",
        LifecyclePhase::Start => "starting",
        LifecyclePhase::Stop => "stopping",
    }
}

/// A best-effort action that failed without aborting its step.
#[derive(Debug)]
pub struct StepFailure {
    pub step: String,
    /// Position of the action within its step.
    pub index: usize,
    pub component: String,
    pub phase: LifecyclePhase,
    pub error: LifecycleError,
}

/// Outcome of a step that ran to completion.
#[derive(Debug, Default)]
pub struct StepReport {
    step: String,
    executed: usize,
    failures: Vec<StepFailure>,
}

impl StepReport {
    #[must_use]
    pub fn new(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            executed: 0,
            failures: Vec::new(),
        }
    }

    #[must_use]
    pub fn step(&self) -> &str {
        &self.step
    }

    /// Number of actions that were invoked, including merged reports.
    #[must_use]
    pub fn executed(&self) -> usize {
        self.executed
    }

    #[must_use]
    pub fn failures(&self) -> &[StepFailure] {
        &self.failures
    }

    #[must_use]
    pub fn into_failures(self) -> Vec<StepFailure> {
        self.failures
    }

    #[must_use]
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.index).collect()
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// The step completed but at least one action failed.
    #[must_use]
    pub fn is_partial_failure(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Fold a nested report into this one. Failures keep their own step name.
    pub fn merge(&mut self, other: StepReport) {
        self.executed += other.executed;
        self.failures.extend(other.failures);
    }
}
