use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::net::TcpStream;

use super::ApiTransport;

/// Transport whose readiness is "a TCP connection to the address succeeds".
///
/// The host name is resolved on `open` and again on each probe while
/// unresolved; resolution failures count as "not reachable yet".
pub struct TcpProbeTransport {
    address: String,
    connect_timeout: Duration,
    resolved: RwLock<Option<SocketAddr>>,
}

impl TcpProbeTransport {
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

    /// `address` is a `host:port` pair.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            resolved: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn resolve(&self) -> Option<SocketAddr> {
        let cached = *self.resolved.read();
        if cached.is_some() {
            return cached;
        }
        match tokio::net::lookup_host(self.address.as_str()).await {
            Ok(mut addrs) => {
                let addr = addrs.next()?;
                *self.resolved.write() = Some(addr);
                Some(addr)
            }
            Err(e) => {
                tracing::debug!(address = %self.address, error = %e, "address not resolvable yet");
                None
            }
        }
    }
}

#[async_trait]
impl ApiTransport for TcpProbeTransport {
    fn endpoint(&self) -> Option<String> {
        self.resolved.read().as_ref().map(ToString::to_string)
    }

    async fn open(&self) -> anyhow::Result<()> {
        if self.address.rsplit_once(':').is_none() {
            anyhow::bail!("invalid address '{}': expected host:port", self.address);
        }
        self.resolve().await;
        Ok(())
    }

    async fn probe(&self) -> bool {
        let Some(addr) = self.resolve().await else {
            return false;
        };
        matches!(
            tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }

    async fn close(&self) -> anyhow::Result<()> {
        *self.resolved.write() = None;
        Ok(())
    }
}
