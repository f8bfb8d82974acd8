//! Error taxonomy for the supervisor core.
//!
//! Startup-time variants (`MissingParam`, `WorkerNotFound`, `ConfigWrite`,
//! `Spawn`, `DiedOnStart`, `ReadyTimeout`) are fatal for the launch attempt
//! that produced them. `Transport` and `NotReady` are per-request and never
//! affect supervisor state.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by the supervisor core.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A required worker parameter is absent (caught before launch).
    #[error("missing required worker parameter: {0}")]
    MissingParam(&'static str),

    /// No worker executable could be resolved from the candidate list.
    #[error("worker executable not found (tried: {})", tried.join(", "))]
    WorkerNotFound { tried: Vec<String> },

    /// Writing the worker configuration file failed.
    #[error("failed to write worker config at {path}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Spawning the worker process failed.
    #[error("failed to spawn worker {executable}")]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The worker exited before it became ready.
    #[error("worker exited during startup: {status}")]
    DiedOnStart { status: String },

    /// The worker never became reachable within the probe deadline.
    #[error("worker did not become ready within {deadline:?}")]
    ReadyTimeout { deadline: Duration },

    /// A control-channel operation failed at the transport level.
    #[error("control transport failure: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// A command was issued while the worker is not ready. Retryable.
    #[error("worker is not ready")]
    NotReady,
}

impl SupervisorError {
    /// Build a transport error from an I/O failure.
    pub fn transport(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(source),
        }
    }
}
