//! Readiness prober.
//!
//! The worker gives no reliable liveness signal of its own, so readiness is
//! inferred: for the socket transport a bare TCP connect-and-close against
//! the control port, for the PTY transport a fixed settle delay (there is no
//! independent signal to check). Either way the child's exit status is
//! polled throughout so "died on start" is distinguished from "still
//! starting". Two-tier timing (overall deadline, short poll interval)
//! avoids both busy-spinning and missing a worker that becomes ready just
//! after a check.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::control::ControlEndpoint;
use crate::launcher::ChildHandle;

/// Terminal states of a readiness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The control endpoint accepted a connection (or the settle delay
    /// elapsed with the child still alive).
    Ready,
    /// The child exited before becoming ready. Fatal for this attempt.
    DiedOnStart { status: String },
    /// The deadline elapsed without a successful check.
    TimedOut,
}

/// Probe timing knobs. Defaults follow the empirical values the worker
/// needs in practice; tests shrink them.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Overall deadline for the probe.
    pub deadline: Duration,
    /// Sleep between readiness checks.
    pub poll_interval: Duration,
    /// PTY variant: settle delay that substitutes for an explicit check.
    pub pty_settle: Duration,
    /// Socket variant: per-attempt connect timeout.
    pub connect_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(8),
            poll_interval: Duration::from_millis(500),
            pty_settle: Duration::from_secs(3),
            connect_timeout: Duration::from_millis(500),
        }
    }
}

/// Run the readiness probe for a freshly launched worker.
pub async fn probe_ready(
    handle: &mut ChildHandle,
    endpoint: &ControlEndpoint,
    cfg: &ProbeConfig,
) -> ProbeOutcome {
    match endpoint {
        ControlEndpoint::Pty => settle_probe(handle, cfg).await,
        ControlEndpoint::Socket(addr) => connect_probe(handle, *addr, cfg).await,
    }
}

/// PTY variant: wait out the settle delay, checking for early exit at poll
/// granularity. Alive after the delay counts as ready.
async fn settle_probe(handle: &mut ChildHandle, cfg: &ProbeConfig) -> ProbeOutcome {
    let deadline = tokio::time::Instant::now() + cfg.pty_settle;
    loop {
        if let Some(status) = exited(handle) {
            return ProbeOutcome::DiedOnStart { status };
        }
        if tokio::time::Instant::now() >= deadline {
            return ProbeOutcome::Ready;
        }
        tokio::time::sleep(cfg.poll_interval.min(Duration::from_millis(100))).await;
    }
}

/// Socket variant: connect-and-close attempts against the control port
/// until the deadline.
async fn connect_probe(handle: &mut ChildHandle, addr: SocketAddr, cfg: &ProbeConfig) -> ProbeOutcome {
    let deadline = tokio::time::Instant::now() + cfg.deadline;
    loop {
        if let Some(status) = exited(handle) {
            return ProbeOutcome::DiedOnStart { status };
        }

        match tokio::time::timeout(cfg.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                return ProbeOutcome::Ready;
            }
            Ok(Err(e)) => {
                tracing::debug!(%addr, error = %e, "control port not accepting yet");
            }
            Err(_) => {
                tracing::debug!(%addr, "control port connect attempt timed out");
            }
        }

        if tokio::time::Instant::now() >= deadline {
            return ProbeOutcome::TimedOut;
        }
        tokio::time::sleep(cfg.poll_interval).await;
    }
}

fn exited(handle: &mut ChildHandle) -> Option<String> {
    match handle.try_wait() {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!(error = %e, "exit check failed during probe");
            None
        }
    }
}
