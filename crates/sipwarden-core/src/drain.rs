//! Background drain for the worker's asynchronous output.
//!
//! The worker prints unstructured diagnostic text at its own pace; a
//! dedicated task consumes it so the worker never stalls on a full output
//! buffer. The drain starts before readiness probing so early diagnostics
//! are not lost. End-of-stream means the child exited, which is an expected
//! shutdown signal here, not an error.

use std::io::Read;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::task::JoinHandle;

/// The readable side of a launched worker, by transport wiring.
pub enum WorkerOutput {
    /// PTY master read end (blocking I/O, drained off the async runtime).
    Pty(Box<dyn Read + Send>),
    /// Captured pipes from the pipe-variant launch. stderr is drained into
    /// the same sink as stdout.
    Pipes {
        stdout: Option<ChildStdout>,
        stderr: Option<ChildStderr>,
    },
}

/// Spawn the drain task for a worker's output stream.
///
/// The returned handle completes when the stream closes. The supervisor
/// aborts it on stop so repeated restarts do not leak tasks.
pub fn spawn_drain(output: WorkerOutput) -> JoinHandle<()> {
    match output {
        WorkerOutput::Pty(reader) => tokio::task::spawn_blocking(move || drain_pty(reader)),
        WorkerOutput::Pipes { stdout, stderr } => tokio::spawn(async move {
            let out = async {
                if let Some(stdout) = stdout {
                    drain_lines(stdout, "stdout").await;
                }
            };
            let err = async {
                if let Some(stderr) = stderr {
                    drain_lines(stderr, "stderr").await;
                }
            };
            tokio::join!(out, err);
            tracing::debug!("worker output streams closed");
        }),
    }
}

/// Read the PTY master in chunks, forwarding non-empty lines to the log.
///
/// The PTY emits prompts and partial lines; chunked lossy decoding matches
/// what an interactive terminal would show without waiting for newlines.
fn drain_pty(mut reader: Box<dyn Read + Send>) {
    let mut buf = [0u8; 1024];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]);
                for line in chunk.lines() {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        tracing::info!(target: "sipwarden::worker", "{trimmed}");
                    }
                }
            }
            Err(e) => {
                // EIO on the master is how a closed PTY reports child exit.
                tracing::debug!(error = %e, "PTY read ended");
                break;
            }
        }
    }
    tracing::debug!("worker PTY output closed");
}

async fn drain_lines<R>(stream: R, source: &'static str)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    tracing::info!(target: "sipwarden::worker", source, "{trimmed}");
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(source, error = %e, "worker output read ended");
                break;
            }
        }
    }
}
