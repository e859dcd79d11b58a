//! Peer liveness detection.
//!
//! Reconnection is gated on an explicit application-level ping rather than
//! transport-level keepalives: a probe either answers within a short bounded
//! timeout or the peer is treated as unreachable.
//!
//! [`ConnectionDetector::block_until_connected`] composes those bounded
//! probes into an unbounded wait with a fixed pause between attempts — no
//! exponential backoff, no attempt cap. That is acceptable only because it
//! gates a long-lived background daemon where indefinite blocking is
//! tolerable. The wait is cancellable through the same watch-flag mechanism
//! the engine uses for shutdown.
//!
//! Probing never returns an error: every failure mode (timeout, transport
//! error, early stream completion) surfaces as `is_available() == false`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{timeout, Instant};
use tracing::debug;

use crate::error::BoxFuture;
use crate::metrics;

/// Future type for probe results (plain `bool`, probes cannot fail).
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// The side-effect-free ping contract a peer transport provides.
///
/// Expected to resolve quickly when the peer is reachable and to error (or
/// never resolve) otherwise; the detector imposes the timeout.
pub trait PeerPing: Send + Sync + 'static {
    /// One request/response round trip with no sync effect.
    fn ping(&self) -> BoxFuture<'_, ()>;
}

/// Liveness probe and wait-until-reachable primitive.
pub trait ConnectionDetector: Send + Sync {
    /// Probe once. True iff a response arrived within the bounded timeout.
    fn is_available(&self) -> ProbeFuture<'_>;

    /// Probe repeatedly with a fixed pause between attempts until the peer
    /// answers or `shutdown` flips to true. Returns true when connected,
    /// false when cancelled.
    fn block_until_connected(&self, shutdown: watch::Receiver<bool>) -> ProbeFuture<'_>;
}

/// Tunables for [`PingDetector`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// How long to wait for one ping response (ms).
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,

    /// Pause between probe attempts while waiting for the peer (seconds).
    #[serde(default = "default_probe_interval_sec")]
    pub probe_interval_sec: u64,
}

fn default_ping_timeout_ms() -> u64 {
    1_000
}

fn default_probe_interval_sec() -> u64 {
    10
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            ping_timeout_ms: 1_000,
            probe_interval_sec: 10,
        }
    }
}

impl DetectorConfig {
    /// Per-attempt ping timeout as a [`Duration`].
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// Pause between attempts as a [`Duration`].
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_sec)
    }

    /// Fast timings so tests don't wait on real probe intervals.
    pub fn for_testing() -> Self {
        Self {
            ping_timeout_ms: 20,
            probe_interval_sec: 1,
        }
    }
}

/// Detector backed by a [`PeerPing`] implementation.
pub struct PingDetector<P: PeerPing> {
    peer: P,
    config: DetectorConfig,
}

impl<P: PeerPing> PingDetector<P> {
    /// Create a detector over the given ping transport.
    pub fn new(peer: P, config: DetectorConfig) -> Self {
        Self { peer, config }
    }
}

impl<P: PeerPing> ConnectionDetector for PingDetector<P> {
    fn is_available(&self) -> ProbeFuture<'_> {
        Box::pin(async move {
            let started = Instant::now();
            let available = match timeout(self.config.ping_timeout(), self.peer.ping()).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    debug!(error = %e, "peer ping failed");
                    false
                }
                Err(_) => {
                    debug!(
                        timeout_ms = self.config.ping_timeout_ms,
                        "peer ping timed out"
                    );
                    false
                }
            };
            metrics::record_peer_ping(available, started.elapsed());
            available
        })
    }

    fn block_until_connected(&self, mut shutdown: watch::Receiver<bool>) -> ProbeFuture<'_> {
        Box::pin(async move {
            loop {
                if self.is_available().await {
                    return true;
                }
                tokio::select! {
                    changed = shutdown.changed() => {
                        // Sender gone counts as shutdown; a spurious wakeup
                        // with the flag still false just restarts the pause.
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("liveness wait cancelled");
                            return false;
                        }
                    }
                    _ = tokio::time::sleep(self.config.probe_interval()) => {}
                }
            }
        })
    }
}

/// Detector that always reports available and never blocks.
///
/// For tests and deployments without a liveness requirement.
#[derive(Debug, Default, Clone)]
pub struct NoopDetector;

impl ConnectionDetector for NoopDetector {
    fn is_available(&self) -> ProbeFuture<'_> {
        Box::pin(async { true })
    }

    fn block_until_connected(&self, _shutdown: watch::Receiver<bool>) -> ProbeFuture<'_> {
        Box::pin(async { true })
    }
}
