//! Client-side channels to remote APIs and their readiness tracking.
//!
//! An [`ApiChannel`] is a lifecycle component: `initialize` opens the
//! transport, `start` marks the channel usable, `stop` closes it. Readiness is
//! tracked separately through [`ApiChannel::probe`] and
//! [`ApiChannel::wait_for_available`].

mod tcp;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::LifecycleError;
use crate::lifecycle::{Lifecycle, LifecycleComponent, LifecycleCtx, LifecyclePhase, LifecycleState};

pub use tcp::TcpProbeTransport;

/// Lower bound applied to readiness poll intervals.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Wire-level plumbing behind an [`ApiChannel`].
#[async_trait]
pub trait ApiTransport: Send + Sync + 'static {
    /// Address of the remote endpoint once it has been discovered.
    fn endpoint(&self) -> Option<String>;

    /// Prepare the transport (resolve addresses, build clients).
    ///
    /// # Errors
    /// Fails when the transport cannot be constructed at all. An unreachable
    /// remote must not fail here; report it through [`ApiTransport::probe`].
    async fn open(&self) -> anyhow::Result<()>;

    /// Single readiness check. Must not hang; bound it with a timeout.
    async fn probe(&self) -> bool;

    /// Release transport resources.
    ///
    /// # Errors
    /// Fails when resources could not be released cleanly.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Channel to one remote API, identified by its target service name.
pub struct ApiChannel {
    lifecycle: Lifecycle,
    transport: Arc<dyn ApiTransport>,
    reachable: AtomicBool,
}

impl ApiChannel {
    #[must_use]
    pub fn new(target: impl Into<Arc<str>>, transport: Arc<dyn ApiTransport>) -> Self {
        Self {
            lifecycle: Lifecycle::new(target),
            transport,
            reachable: AtomicBool::new(false),
        }
    }

    /// Name of the remote service this channel talks to.
    #[must_use]
    pub fn target(&self) -> &str {
        self.lifecycle.id()
    }

    #[must_use]
    pub fn endpoint(&self) -> Option<String> {
        self.transport.endpoint()
    }

    /// Result of the most recent probe.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }

    /// Probe the remote once and record the outcome.
    pub async fn probe(&self) -> bool {
        let ok = self.transport.probe().await;
        let was = self.reachable.swap(ok, Ordering::AcqRel);
        if was != ok {
            tracing::debug!(api = self.target(), reachable = ok, "api reachability changed");
        }
        ok
    }

    /// Poll until a probe succeeds.
    ///
    /// Probes immediately, then every `poll_interval` (clamped to
    /// [`MIN_POLL_INTERVAL`]). Gives up once at least `timeout` has elapsed since
    /// the call, so the wait never ends before `timeout` and never overshoots it
    /// by more than one probe. Returns the elapsed time on success.
    ///
    /// # Errors
    /// [`LifecycleError::ApiNotAvailable`] on timeout, [`LifecycleError::Cancelled`]
    /// if `cancel` fires while waiting.
    pub async fn wait_for_available(
        &self,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<Duration, LifecycleError> {
        let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        let started = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled());
            }
            if self.probe().await {
                return Ok(started.elapsed());
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(LifecycleError::ApiNotAvailable {
                    target: self.target().to_owned(),
                    elapsed,
                });
            }

            let nap = poll_interval.min(timeout.saturating_sub(elapsed));
            tracing::trace!(api = self.target(), ?nap, "api not reachable yet");
            tokio::select! {
                () = cancel.cancelled() => return Err(self.cancelled()),
                () = tokio::time::sleep(nap) => {}
            }
        }
    }

    fn cancelled(&self) -> LifecycleError {
        LifecycleError::Cancelled {
            component: self.target().to_owned(),
        }
    }
}

#[async_trait]
impl LifecycleComponent for ApiChannel {
    fn id(&self) -> &str {
        self.lifecycle.id()
    }

    fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    async fn initialize(&self, _ctx: &LifecycleCtx) -> Result<(), LifecycleError> {
        self.lifecycle
            .drive(LifecyclePhase::Initialize, || self.transport.open())
            .await
    }

    async fn start(&self, _ctx: &LifecycleCtx) -> Result<(), LifecycleError> {
        self.lifecycle
            .drive(LifecyclePhase::Start, || async {
                tracing::info!(
                    api = self.target(),
                    endpoint = self.endpoint().as_deref().unwrap_or("<unresolved>"),
                    "api channel ready"
                );
                Ok(())
            })
            .await
    }

    async fn stop(&self, _ctx: &LifecycleCtx) -> Result<(), LifecycleError> {
        self.lifecycle
            .drive(LifecyclePhase::Stop, || async {
                self.reachable.store(false, Ordering::Release);
                self.transport.close().await
            })
            .await
    }
}

impl std::fmt::Debug for ApiChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiChannel")
            .field("target", &self.target())
            .field("state", &self.state())
            .field("reachable", &self.is_reachable())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Reports reachable starting from the n-th probe (1-based); `None` never.
    struct Countdown {
        succeed_from: Option<usize>,
        probes: AtomicUsize,
        closed: AtomicBool,
    }

    impl Countdown {
        fn new(succeed_from: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                succeed_from,
                probes: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl ApiTransport for Countdown {
        fn endpoint(&self) -> Option<String> {
            Some("device-management.local:9000".to_owned())
        }
        async fn open(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn probe(&self) -> bool {
            let n = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
            self.succeed_from.is_some_and(|k| n >= k)
        }
        async fn close(&self) -> anyhow::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn becomes_available_on_third_probe() {
        let transport = Countdown::new(Some(3));
        let channel = ApiChannel::new("device-management", transport.clone());
        let poll = Duration::from_millis(250);

        let elapsed = channel
            .wait_for_available(Duration::from_secs(10), poll, &CancellationToken::new())
            .await
            .unwrap();

        assert!(elapsed >= 2 * poll, "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(10));
        assert_eq!(transport.probes.load(Ordering::SeqCst), 3);
        assert!(channel.is_reachable());
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_no_earlier_than_timeout() {
        let channel = ApiChannel::new("device-management", Countdown::new(None));
        let timeout = Duration::from_secs(1);
        let begin = Instant::now();

        let err = channel
            .wait_for_available(timeout, Duration::from_millis(300), &CancellationToken::new())
            .await
            .unwrap_err();

        let waited = begin.elapsed();
        assert!(waited >= timeout, "{waited:?}");
        assert!(waited < timeout + Duration::from_millis(300), "{waited:?}");
        match err {
            LifecycleError::ApiNotAvailable { target, elapsed } => {
                assert_eq!(target, "device-management");
                assert!(elapsed >= timeout);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!channel.is_reachable());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_poll_interval_is_clamped() {
        let transport = Countdown::new(None);
        let channel = ApiChannel::new("device-management", transport.clone());

        let _ = channel
            .wait_for_available(
                Duration::from_millis(100),
                Duration::ZERO,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        let probes = transport.probes.load(Ordering::SeqCst);
        assert!(probes <= 11, "poll interval not clamped: {probes} probes");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_wait() {
        let channel = Arc::new(ApiChannel::new("device-management", Countdown::new(None)));
        let cancel = CancellationToken::new();

        let waiter = {
            let channel = channel.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                channel
                    .wait_for_available(Duration::from_secs(3600), Duration::from_secs(1), &cancel)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn stop_closes_transport_and_clears_reachability() {
        let transport = Countdown::new(Some(1));
        let channel = ApiChannel::new("device-management", transport.clone());
        let ctx = LifecycleCtx::default();

        channel.initialize(&ctx).await.unwrap();
        channel.start(&ctx).await.unwrap();
        assert!(channel.probe().await);

        channel.stop(&ctx).await.unwrap();
        assert!(!channel.is_reachable());
        assert!(transport.closed.load(Ordering::SeqCst));
        assert_eq!(channel.state(), LifecycleState::Stopped);
    }
}
