//! Supervisor state and the launch/stop/command surface.
//!
//! `SupervisorState` is the single shared mutable record: whether the
//! worker is believed ready, the canonical [`ChildHandle`], the control
//! channel, and the drain task. It lives behind one mutex and is mutated
//! only through the named transitions below; request handlers read a
//! snapshot and must treat it as stale the instant the lock drops, since
//! concurrent death is always possible.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{self, WorkerParams};
use crate::control::{
    ControlChannel, ControlCommand, ControlEndpoint, PtyControl, SocketControl, SocketTiming,
};
use crate::drain;
use crate::error::SupervisorError;
use crate::launcher::{self, ChildHandle, LaunchedWorker, TransportKind, WorkerSpec};
use crate::locator::WorkerLocator;
use crate::probe::{self, ProbeConfig, ProbeOutcome};
use crate::watchdog;

/// All timing knobs in one place. Defaults are the empirical production
/// values; tests shrink them to keep the suite fast.
#[derive(Debug, Clone)]
pub struct SupervisorTiming {
    pub probe: ProbeConfig,
    pub socket: SocketTiming,
    /// Watchdog liveness-check interval.
    pub watchdog_interval: Duration,
    /// Cooldown between detecting a death and relaunching.
    pub restart_cooldown: Duration,
    /// Grace period for SIGTERM before force kill.
    pub stop_grace: Duration,
    /// Pause between the best-effort quit command and termination.
    pub quit_settle: Duration,
}

impl Default for SupervisorTiming {
    fn default() -> Self {
        Self {
            probe: ProbeConfig::default(),
            socket: SocketTiming::default(),
            watchdog_interval: Duration::from_secs(10),
            restart_cooldown: Duration::from_secs(5),
            stop_grace: Duration::from_secs(5),
            quit_settle: Duration::from_millis(500),
        }
    }
}

/// Point-in-time view of the supervisor for status reporting. Stale as
/// soon as it is produced.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusSnapshot {
    /// Worker believed reachable and accepting commands.
    pub ready: bool,
    /// Child process currently alive (non-blocking check).
    pub running: bool,
    pub pid: Option<u32>,
    pub transport: TransportKind,
    pub started_at: Option<DateTime<Utc>>,
}

/// Shared mutable record. All writers go through the named transitions.
struct SupervisorState {
    ready: bool,
    handle: Option<ChildHandle>,
    control: Option<Arc<dyn ControlChannel>>,
    drain: Option<JoinHandle<()>>,
    started_at: Option<DateTime<Utc>>,
}

impl SupervisorState {
    fn new() -> Self {
        Self {
            ready: false,
            handle: None,
            control: None,
            drain: None,
            started_at: None,
        }
    }

    /// Install a freshly launched worker and mark it ready.
    fn install(
        &mut self,
        handle: ChildHandle,
        control: Arc<dyn ControlChannel>,
        drain: JoinHandle<()>,
    ) {
        self.handle = Some(handle);
        self.control = Some(control);
        self.drain = Some(drain);
        self.ready = true;
        self.started_at = Some(Utc::now());
    }

    /// Death detected: clear readiness and release everything tied to the
    /// dead child. The exited handle is dropped (already reaped).
    fn mark_dead(&mut self) {
        self.ready = false;
        self.handle = None;
        self.control = None;
        self.started_at = None;
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
    }

    /// Stop/replace: clear readiness and hand the owned pieces to the
    /// caller. Returns `None` handle when there is nothing to stop, which
    /// makes double-stop a no-op.
    fn take_for_stop(
        &mut self,
    ) -> (
        Option<ChildHandle>,
        Option<Arc<dyn ControlChannel>>,
        Option<JoinHandle<()>>,
    ) {
        self.ready = false;
        self.started_at = None;
        (self.handle.take(), self.control.take(), self.drain.take())
    }
}

/// Supervises one external worker process: launches it, keeps it alive,
/// and bridges commands to it.
pub struct Supervisor {
    params: WorkerParams,
    transport: TransportKind,
    timing: SupervisorTiming,
    locator: WorkerLocator,
    config_path: PathBuf,
    state: Mutex<SupervisorState>,
    /// Serializes launch sequences; overlapping launches would each spawn
    /// a child and the later install would orphan the earlier one.
    launch_gate: Mutex<()>,
    watchdog_started: AtomicBool,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(params: WorkerParams, transport: TransportKind) -> Self {
        Self::with_parts(
            params,
            transport,
            WorkerLocator::default(),
            config::default_config_path(),
            SupervisorTiming::default(),
        )
    }

    /// Full constructor for callers that need a custom locator, config
    /// path, or timing (tests, mainly).
    pub fn with_parts(
        params: WorkerParams,
        transport: TransportKind,
        locator: WorkerLocator,
        config_path: PathBuf,
        timing: SupervisorTiming,
    ) -> Self {
        Self {
            params,
            transport,
            timing,
            locator,
            config_path,
            state: Mutex::new(SupervisorState::new()),
            launch_gate: Mutex::new(()),
            watchdog_started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn params(&self) -> &WorkerParams {
        &self.params
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub(crate) fn timing(&self) -> &SupervisorTiming {
        &self.timing
    }

    fn control_endpoint(&self) -> ControlEndpoint {
        match self.transport {
            TransportKind::Pty => ControlEndpoint::Pty,
            TransportKind::Socket => ControlEndpoint::Socket(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                self.params.control_port,
            )),
        }
    }

    /// Run the full launch sequence: locate, materialize config, sweep
    /// stale processes, spawn, start the drain, probe readiness, install.
    ///
    /// Any previously installed worker is invalidated and terminated
    /// before the new one is spawned. Concurrent calls are serialized;
    /// the later launch replaces the earlier worker.
    pub async fn launch(&self) -> Result<(), SupervisorError> {
        let _gate = self.launch_gate.lock().await;

        let executable = self.locator.locate()?;
        config::materialize(&self.params, self.transport, &self.config_path)?;

        if let Some(name) = executable.file_name().and_then(|n| n.to_str()) {
            launcher::kill_stale(name).await;
        }

        // Invalidate the old handle before installing a new one.
        let (old_handle, _old_control, old_drain) = {
            let mut state = self.state.lock().await;
            state.take_for_stop()
        };
        if let Some(mut old) = old_handle {
            old.terminate(self.timing.stop_grace).await;
        }
        if let Some(drain) = old_drain {
            drain.abort();
        }

        let spec = WorkerSpec::new(executable, self.config_path.clone());
        let LaunchedWorker {
            mut handle,
            output,
            mut pty_writer,
        } = launcher::launch(&spec, self.transport)?;

        // Drain first: early diagnostics must not be lost, and the child
        // must never block on a full output buffer during the probe.
        let drain = drain::spawn_drain(output);

        let endpoint = self.control_endpoint();
        match probe::probe_ready(&mut handle, &endpoint, &self.timing.probe).await {
            ProbeOutcome::Ready => {}
            ProbeOutcome::DiedOnStart { status } => {
                drain.abort();
                return Err(SupervisorError::DiedOnStart { status });
            }
            ProbeOutcome::TimedOut => {
                handle.terminate(self.timing.stop_grace).await;
                drain.abort();
                return Err(SupervisorError::ReadyTimeout {
                    deadline: self.timing.probe.deadline,
                });
            }
        }

        let control: Arc<dyn ControlChannel> = match endpoint {
            ControlEndpoint::Pty => {
                let writer = pty_writer.take().ok_or_else(|| SupervisorError::Spawn {
                    executable: spec.executable.clone(),
                    source: std::io::Error::other("PTY launch returned no writer"),
                })?;
                Arc::new(PtyControl::new(writer))
            }
            ControlEndpoint::Socket(addr) => {
                Arc::new(SocketControl::new(addr, self.timing.socket.clone()))
            }
        };

        let pid = handle.pid();
        let mut state = self.state.lock().await;
        state.install(handle, control, drain);
        tracing::info!(pid, transport = %self.transport, "worker ready");
        Ok(())
    }

    /// Start the watchdog loop. Idempotent: only the first call spawns a
    /// task; later calls return `false` and do nothing.
    pub fn start_watchdog(self: &Arc<Self>) -> bool {
        if self.watchdog_started.swap(true, Ordering::SeqCst) {
            return false;
        }
        watchdog::spawn(Arc::clone(self), self.shutdown.child_token());
        true
    }

    /// Deliver one command to the worker.
    ///
    /// Rejects with [`SupervisorError::NotReady`] before touching the
    /// transport when the worker is not believed ready. The channel is
    /// snapshotted out of the lock, so a slow send never serializes other
    /// commands or blocks the watchdog.
    pub async fn send_command(&self, command: &ControlCommand) -> Result<(), SupervisorError> {
        let control = {
            let state = self.state.lock().await;
            if !state.ready {
                return Err(SupervisorError::NotReady);
            }
            state.control.clone().ok_or(SupervisorError::NotReady)?
        };
        control.send(command).await
    }

    /// Current readiness belief.
    pub async fn is_ready(&self) -> bool {
        self.state.lock().await.ready
    }

    /// Point-in-time status for the API layer. Never errors.
    pub async fn status(&self) -> StatusSnapshot {
        let mut state = self.state.lock().await;
        let running = state
            .handle
            .as_mut()
            .is_some_and(|h| matches!(h.try_wait(), Ok(None)));
        StatusSnapshot {
            ready: state.ready,
            running,
            pid: state.handle.as_ref().map(ChildHandle::pid),
            transport: self.transport,
            started_at: state.started_at,
        }
    }

    /// Watchdog hook: if the canonical child has exited, transition to
    /// dead and return the exit description. `None` when the child is
    /// alive or there is no child to check.
    pub(crate) async fn reap_if_exited(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        let status = match state.handle.as_mut()?.try_wait() {
            Ok(Some(status)) => status,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "liveness check failed");
                return None;
            }
        };
        state.mark_dead();
        Some(status)
    }

    /// Stop the worker: best-effort quit command, brief settle, graceful
    /// terminate with bounded grace, force kill. Always clears readiness.
    /// Safe to call twice and safe to race with the watchdog; the single
    /// state transition hands ownership of the handle to exactly one
    /// caller.
    pub async fn stop(&self) {
        let (handle, control, drain) = {
            let mut state = self.state.lock().await;
            state.take_for_stop()
        };

        let Some(mut handle) = handle else {
            tracing::debug!("stop requested but no worker installed");
            return;
        };

        if let Some(control) = control {
            if let Err(e) = control.send(&ControlCommand::quit()).await {
                tracing::debug!(error = %e, "quit command failed, terminating anyway");
            }
        }
        tokio::time::sleep(self.timing.quit_settle).await;

        handle.terminate(self.timing.stop_grace).await;
        if let Some(drain) = drain {
            drain.abort();
        }
        tracing::info!("worker stopped");
    }

    /// Full shutdown: cancel the watchdog, then run the stop sequence.
    /// Intended for the process signal handler.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params() -> WorkerParams {
        WorkerParams {
            extension: "1001".to_string(),
            registrar: "sip.test".to_string(),
            password: "pw".to_string(),
            realm: "*".to_string(),
            local_port: 5060,
            control_port: 2323,
            null_audio: true,
            auto_answer: Some(200),
        }
    }

    #[tokio::test]
    async fn send_command_before_launch_is_not_ready() {
        let sup = Supervisor::new(test_params(), TransportKind::Socket);
        let err = sup
            .send_command(&ControlCommand::hangup())
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::NotReady));
    }

    #[tokio::test]
    async fn status_before_launch_reports_nothing_running() {
        let sup = Supervisor::new(test_params(), TransportKind::Pty);
        let status = sup.status().await;
        assert!(!status.ready);
        assert!(!status.running);
        assert_eq!(status.pid, None);
        assert_eq!(status.started_at, None);
    }

    #[tokio::test]
    async fn stop_without_worker_is_a_no_op() {
        let sup = Supervisor::new(test_params(), TransportKind::Pty);
        sup.stop().await;
        sup.stop().await;
        assert!(!sup.is_ready().await);
    }

    #[tokio::test]
    async fn watchdog_start_is_idempotent() {
        let sup = Arc::new(Supervisor::new(test_params(), TransportKind::Pty));
        assert!(sup.start_watchdog());
        assert!(!sup.start_watchdog(), "second start must not spawn another loop");
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn launch_fails_when_worker_is_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let locator = WorkerLocator::new(vec!["sipwarden-no-such-worker".to_string()])
            .with_search_roots(vec![]);
        let sup = Supervisor::with_parts(
            test_params(),
            TransportKind::Socket,
            locator,
            tmp.path().join("worker.conf"),
            SupervisorTiming::default(),
        );
        let err = sup.launch().await.unwrap_err();
        assert!(matches!(err, SupervisorError::WorkerNotFound { .. }));
        assert!(!sup.is_ready().await);
    }
}
