//! Process run loop for a single microservice.
//!
//! Phase order: **initialize → start → serve → stop**.
//! Shutdown can be driven by OS signals, an external `CancellationToken`,
//! or an arbitrary future. While serving, tenant assignment events are applied
//! in arrival order per tenant and concurrently across tenants.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use svckit::{LifecycleComponent, LifecycleError, Microservice, StepReport, Tenant, TenantId};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::signals;

/// How the run loop should decide when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, we initiate shutdown.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

/// Tenant (un)assignment delivered by the hosting platform.
#[derive(Debug, Clone)]
pub enum TenantEvent {
    Assigned(Tenant),
    Unassigned(TenantId),
}

impl TenantEvent {
    fn tenant_id(&self) -> &TenantId {
        match self {
            Self::Assigned(tenant) => &tenant.id,
            Self::Unassigned(id) => id,
        }
    }
}

pub struct RunOptions {
    /// Shutdown strategy.
    pub shutdown: ShutdownOptions,
    /// Source of tenant events; `None` serves without tenant changes.
    pub tenant_events: Option<mpsc::Receiver<TenantEvent>>,
}

impl RunOptions {
    #[must_use]
    pub fn new(shutdown: ShutdownOptions) -> Self {
        Self {
            shutdown,
            tenant_events: None,
        }
    }

    #[must_use]
    pub fn with_tenant_events(mut self, events: mpsc::Receiver<TenantEvent>) -> Self {
        self.tenant_events = Some(events);
        self
    }
}

/// Full cycle: initialize → start → serve → stop.
///
/// Returns the stop report once shutdown completed.
///
/// # Errors
/// Returns an error if initialize or start fails. Everything already started is
/// released before returning.
pub async fn run(microservice: Arc<Microservice>, opts: RunOptions) -> anyhow::Result<StepReport> {
    let RunOptions {
        shutdown,
        tenant_events,
    } = opts;
    let cancel = match &shutdown {
        ShutdownOptions::Token(t) => t.clone(),
        _ => CancellationToken::new(),
    };

    match shutdown {
        ShutdownOptions::Signals => {
            let c = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = signals::wait_for_shutdown().await {
                    tracing::warn!(
                        error = %e,
                        "shutdown: primary waiter failed; falling back to ctrl_c()"
                    );
                    _ = tokio::signal::ctrl_c().await;
                }
                c.cancel();
            });
        }
        ShutdownOptions::Future(waiter) => {
            let c = cancel.clone();
            tokio::spawn(async move {
                waiter.await;
                tracing::info!("shutdown: external future completed");
                c.cancel();
            });
        }
        ShutdownOptions::Token(_) => {
            tracing::info!("shutdown: external token will control lifecycle");
        }
    }

    // Shutdown interrupts a start still waiting for its APIs.
    let linker = {
        let c = cancel.clone();
        let lifecycle_token = microservice.cancellation_token().clone();
        tokio::spawn(async move {
            c.cancelled().await;
            lifecycle_token.cancel();
        })
    };

    let outcome = serve(&microservice, &cancel, tenant_events).await;
    linker.abort();
    outcome
}

async fn serve(
    microservice: &Arc<Microservice>,
    cancel: &CancellationToken,
    tenant_events: Option<mpsc::Receiver<TenantEvent>>,
) -> anyhow::Result<StepReport> {
    tracing::info!(microservice = microservice.identifier(), "Phase: initialize");
    if let Err(e) = microservice.initialize().await {
        return Err(release_after_failure(microservice, "initialize", e).await);
    }

    tracing::info!(microservice = microservice.identifier(), "Phase: start");
    if let Err(e) = microservice.start().await {
        return Err(release_after_failure(microservice, "start", e).await);
    }

    tracing::info!(
        microservice = microservice.identifier(),
        readiness = ?microservice.readiness(),
        "Phase: serve"
    );
    let mut workers = TenantWorkers::default();
    if let Some(mut events) = tenant_events {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => workers.dispatch(microservice, event),
                    None => {
                        tracing::debug!("tenant event source closed; waiting for shutdown");
                        cancel.cancelled().await;
                        break;
                    }
                },
            }
        }
    } else {
        cancel.cancelled().await;
    }

    tracing::info!(microservice = microservice.identifier(), "Phase: stop");
    // Stop waits for tenant operations already running; queued ones fail fast.
    let mut pending = workers.close();
    let report = microservice.stop().await;
    while let Some(joined) = pending.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "tenant worker terminated abnormally");
        }
    }
    Ok(report)
}

async fn release_after_failure(
    microservice: &Microservice,
    phase: &'static str,
    error: LifecycleError,
) -> anyhow::Error {
    tracing::error!(
        microservice = microservice.identifier(),
        phase,
        error = %error,
        "lifecycle phase failed; releasing started components"
    );
    let report = microservice.stop().await;
    tracing::debug!(executed = report.executed(), failures = report.failures().len(), "released");
    anyhow::Error::new(error).context(format!("{phase} of '{}' failed", microservice.name()))
}

/// One sequential worker per tenant so events for a tenant apply in order.
#[derive(Default)]
struct TenantWorkers {
    senders: HashMap<TenantId, mpsc::UnboundedSender<TenantEvent>>,
    tasks: JoinSet<()>,
}

impl TenantWorkers {
    fn dispatch(&mut self, microservice: &Arc<Microservice>, event: TenantEvent) {
        let tenant_id = event.tenant_id().clone();
        let event = match self.senders.get(&tenant_id) {
            Some(tx) => match tx.send(event) {
                Ok(()) => return,
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        _ = tx.send(event);
        let ms = microservice.clone();
        self.tasks.spawn(async move {
            while let Some(event) = rx.recv().await {
                apply_tenant_event(&ms, event).await;
            }
        });
        self.senders.insert(tenant_id, tx);

        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(e) = joined {
                tracing::error!(error = %e, "tenant worker terminated abnormally");
            }
        }
    }

    /// Stop accepting events; queued events still drain.
    fn close(self) -> JoinSet<()> {
        drop(self.senders);
        self.tasks
    }
}

async fn apply_tenant_event(microservice: &Microservice, event: TenantEvent) {
    match event {
        TenantEvent::Assigned(tenant) => {
            let tenant_id = tenant.id.clone();
            match microservice.assign_tenant(tenant).await {
                Ok(engine) => {
                    tracing::info!(tenant = %tenant_id, engine = engine.id(), "tenant assigned");
                }
                Err(e) => {
                    tracing::error!(tenant = %tenant_id, error = %e, "tenant assignment failed");
                }
            }
        }
        TenantEvent::Unassigned(tenant_id) => match microservice.remove_tenant(&tenant_id).await {
            Ok(report) if report.is_partial_failure() => {
                tracing::warn!(
                    tenant = %tenant_id,
                    failures = report.failures().len(),
                    "tenant removed with failures"
                );
            }
            Ok(_) => tracing::info!(tenant = %tenant_id, "tenant removed"),
            Err(e) => {
                tracing::error!(tenant = %tenant_id, error = %e, "tenant removal failed");
            }
        },
    }
}
