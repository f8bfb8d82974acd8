//! Worker process launcher.
//!
//! Starts the worker as a child process in one of two wirings:
//!
//! - **PTY**: the child's stdin, stdout, and stderr are all bound to the
//!   slave side of a pseudo-terminal pair; the parent retains the master
//!   side for reading and for command-line injection.
//! - **Pipe**: the child's stdin is discarded entirely (never a writable
//!   pipe that could break on the parent side); stdout and stderr are both
//!   captured for the output drain. Used with the socket control transport.
//!
//! Exactly one [`ChildHandle`] is canonical at a time; the supervisor's
//! stop path and the watchdog are the only writers that replace it.

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use portable_pty::{CommandBuilder, PtySize, native_pty_system};

use crate::drain::WorkerOutput;
use crate::error::SupervisorError;

/// Which control transport (and therefore process wiring) to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process pseudo-terminal; commands are written to the PTY master.
    Pty,
    /// Loopback TCP command shell; worker output is captured via pipes.
    Socket,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Pty => write!(f, "pty"),
            TransportKind::Socket => write!(f, "socket"),
        }
    }
}

/// Identity of a launchable worker. Recomputed on every (re)start.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    /// Resolved executable path.
    pub executable: PathBuf,
    /// Generated config file path.
    pub config_path: PathBuf,
    /// Process-launch arguments.
    pub args: Vec<String>,
}

impl WorkerSpec {
    pub fn new(executable: PathBuf, config_path: PathBuf) -> Self {
        let args = vec![format!("--config-file={}", config_path.display())];
        Self {
            executable,
            config_path,
            args,
        }
    }
}

/// Ownership wrapper around the live child process.
pub enum ChildHandle {
    Pty {
        child: Box<dyn portable_pty::Child + Send + Sync>,
        /// Held so the master end stays open for the child's lifetime.
        master: Box<dyn portable_pty::MasterPty + Send>,
        pid: u32,
    },
    Pipe {
        child: tokio::process::Child,
        pid: u32,
    },
}

impl std::fmt::Debug for ChildHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChildHandle::Pty { pid, .. } => f.debug_struct("ChildHandle::Pty").field("pid", pid).finish(),
            ChildHandle::Pipe { pid, .. } => {
                f.debug_struct("ChildHandle::Pipe").field("pid", pid).finish()
            }
        }
    }
}

impl ChildHandle {
    pub fn pid(&self) -> u32 {
        match self {
            ChildHandle::Pty { pid, .. } | ChildHandle::Pipe { pid, .. } => *pid,
        }
    }

    /// Non-blocking exit check. Returns a human-readable exit description
    /// once the child has exited, `None` while it is still running.
    pub fn try_wait(&mut self) -> std::io::Result<Option<String>> {
        match self {
            ChildHandle::Pty { child, .. } => Ok(child
                .try_wait()?
                .map(|status| format!("exit code {}", status.exit_code()))),
            ChildHandle::Pipe { child, .. } => {
                Ok(child.try_wait()?.map(|status| status.to_string()))
            }
        }
    }

    /// Request graceful termination: SIGTERM, a bounded wait, then SIGKILL
    /// if the grace period elapses.
    pub async fn terminate(&mut self, grace: Duration) {
        let pid = self.pid();

        #[cfg(unix)]
        {
            // SAFETY: pid came from a child we spawned.
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                tracing::debug!(pid, "SIGTERM failed, proceeding to force kill");
            }
        }

        match self {
            ChildHandle::Pipe { child, .. } => {
                match tokio::time::timeout(grace, child.wait()).await {
                    Ok(Ok(status)) => {
                        tracing::debug!(pid, status = %status, "worker exited after SIGTERM");
                    }
                    _ => {
                        tracing::debug!(pid, "worker did not exit within grace period, killing");
                        let _ = child.kill().await;
                    }
                }
            }
            ChildHandle::Pty { child, .. } => {
                // portable-pty's wait() is blocking; poll try_wait instead.
                let deadline = tokio::time::Instant::now() + grace;
                loop {
                    match child.try_wait() {
                        Ok(Some(status)) => {
                            tracing::debug!(pid, code = status.exit_code(), "worker exited after SIGTERM");
                            return;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::debug!(pid, error = %e, "exit check failed during terminate");
                            break;
                        }
                    }
                    if tokio::time::Instant::now() >= deadline {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                tracing::debug!(pid, "worker did not exit within grace period, killing");
                let _ = child.kill();
            }
        }
    }
}

/// Everything produced by a successful launch: the owned child, its output
/// stream for the drain, and (PTY variant) the master write end.
pub struct LaunchedWorker {
    pub handle: ChildHandle,
    pub output: WorkerOutput,
    pub pty_writer: Option<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for LaunchedWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedWorker")
            .field("pty_writer", &self.pty_writer.is_some())
            .finish_non_exhaustive()
    }
}

/// Best-effort sweep of stale same-named worker processes left over from a
/// previous run. Failures are logged and ignored; this only exists so the
/// control port is deterministically free before a relaunch.
pub async fn kill_stale(worker_name: &str) {
    match tokio::process::Command::new("pkill")
        .arg("-x")
        .arg(worker_name)
        .output()
        .await
    {
        Ok(out) if out.status.success() => {
            tracing::info!(worker = worker_name, "terminated stale worker process");
        }
        Ok(_) => {
            // pkill exits 1 when nothing matched; the common case.
            tracing::debug!(worker = worker_name, "no stale worker processes");
        }
        Err(e) => {
            tracing::debug!(worker = worker_name, error = %e, "stale-worker sweep unavailable");
        }
    }
}

/// Start the worker per the given spec and transport wiring.
pub fn launch(spec: &WorkerSpec, transport: TransportKind) -> Result<LaunchedWorker, SupervisorError> {
    match transport {
        TransportKind::Pty => launch_pty(spec),
        TransportKind::Socket => launch_pipe(spec),
    }
}

fn launch_pty(spec: &WorkerSpec) -> Result<LaunchedWorker, SupervisorError> {
    let spawn_err = |e: anyhow::Error| SupervisorError::Spawn {
        executable: spec.executable.clone(),
        source: std::io::Error::other(e.to_string()),
    };

    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| spawn_err(e))?;

    let mut cmd = CommandBuilder::new(&spec.executable);
    for arg in &spec.args {
        cmd.arg(arg);
    }

    let child = pair.slave.spawn_command(cmd).map_err(|e| spawn_err(e))?;
    // The slave end lives on in the child; the parent must not hold it or
    // the master reader will never observe EOF.
    drop(pair.slave);

    let pid = child.process_id().ok_or_else(|| SupervisorError::Spawn {
        executable: spec.executable.clone(),
        source: std::io::Error::other("child process has no pid"),
    })?;

    let reader = pair.master.try_clone_reader().map_err(|e| spawn_err(e))?;
    let writer = pair.master.take_writer().map_err(|e| spawn_err(e))?;

    tracing::info!(pid, worker = %spec.executable.display(), "worker launched inside PTY");

    Ok(LaunchedWorker {
        handle: ChildHandle::Pty {
            child,
            master: pair.master,
            pid,
        },
        output: WorkerOutput::Pty(reader),
        pty_writer: Some(writer),
    })
}

fn launch_pipe(spec: &WorkerSpec) -> Result<LaunchedWorker, SupervisorError> {
    let mut child = tokio::process::Command::new(&spec.executable)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| SupervisorError::Spawn {
            executable: spec.executable.clone(),
            source,
        })?;

    let pid = child.id().ok_or_else(|| SupervisorError::Spawn {
        executable: spec.executable.clone(),
        source: std::io::Error::other("child process has no pid"),
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    tracing::info!(pid, worker = %spec.executable.display(), "worker launched with piped output");

    Ok(LaunchedWorker {
        handle: ChildHandle::Pipe { child, pid },
        output: WorkerOutput::Pipes { stdout, stderr },
        pty_writer: None,
    })
}
