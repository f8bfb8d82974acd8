//! Command/response bridge to the worker.
//!
//! The worker's interactive shell has no framed message boundaries, so no
//! persistent session is kept. Each command is an independent exchange:
//!
//! - **PTY**: the command line is written straight to the PTY master; the
//!   reply arrives asynchronously through the output drain, so success
//!   means only that the write did not fail.
//! - **Socket**: a fresh loopback TCP connection per command. The shell
//!   greets with a banner and prompt, so the sender sleeps briefly, drains
//!   and discards whatever arrived, writes the CRLF-terminated command,
//!   sleeps the command's settle interval, and reads a reply for logging.
//!   Everything after a successful connect is best-effort: a drain or
//!   read failure is logged and ignored; only a failed connect fails the
//!   command.

use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::SupervisorError;

/// Where commands are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEndpoint {
    /// In-process PTY master file descriptor; not network-visible.
    Pty,
    /// Loopback TCP port speaking the worker's line-oriented shell.
    Socket(SocketAddr),
}

/// A single command line plus the settle delay to wait before reading a
/// response. No identifier, no acknowledgement contract beyond "a response
/// was read without transport error".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCommand {
    pub line: String,
    pub settle: Duration,
}

const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

impl ControlCommand {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            settle: DEFAULT_SETTLE,
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Place a call to `destination` on the given registrar.
    pub fn call(destination: &str, registrar: &str) -> Self {
        Self::new(format!("m sip:{destination}@{registrar}"))
    }

    /// Hang up the current call.
    pub fn hangup() -> Self {
        Self::new("h")
    }

    /// Send touch-tone digits into the current call.
    pub fn dtmf(digits: &str) -> Self {
        Self::new(format!("#{digits}"))
    }

    /// Ask the worker to quit.
    pub fn quit() -> Self {
        Self::new("q").with_settle(Duration::from_millis(200))
    }
}

/// Object-safe command sender; one implementation per transport.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Deliver one command. See the module docs for what "success" means
    /// per transport.
    async fn send(&self, command: &ControlCommand) -> Result<(), SupervisorError>;

    /// The endpoint this channel talks to.
    fn endpoint(&self) -> ControlEndpoint;
}

// Compile-time assertion: ControlChannel must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn ControlChannel) {}
};

// ---------------------------------------------------------------------------
// PTY transport
// ---------------------------------------------------------------------------

/// Writes command lines to the PTY master. Output is not read here; the
/// drain task owns the read side.
pub struct PtyControl {
    writer: tokio::sync::Mutex<Box<dyn Write + Send>>,
}

impl PtyControl {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
        }
    }
}

#[async_trait]
impl ControlChannel for PtyControl {
    async fn send(&self, command: &ControlCommand) -> Result<(), SupervisorError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(format!("{}\n", command.line).as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|e| SupervisorError::transport("write to PTY master", e))?;
        tracing::debug!(line = %command.line, "command written to PTY");
        Ok(())
    }

    fn endpoint(&self) -> ControlEndpoint {
        ControlEndpoint::Pty
    }
}

// ---------------------------------------------------------------------------
// Socket transport
// ---------------------------------------------------------------------------

/// Timing knobs for the per-command socket exchange.
#[derive(Debug, Clone)]
pub struct SocketTiming {
    /// Bound on the TCP connect (the only hard failure).
    pub connect_timeout: Duration,
    /// Sleep before draining the banner/prompt.
    pub banner_settle: Duration,
    /// Bound on each best-effort read.
    pub read_timeout: Duration,
}

impl Default for SocketTiming {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            banner_settle: Duration::from_millis(300),
            read_timeout: Duration::from_millis(500),
        }
    }
}

/// Opens a fresh connection to the worker's loopback command shell for
/// every command.
pub struct SocketControl {
    addr: SocketAddr,
    timing: SocketTiming,
}

impl SocketControl {
    pub fn new(addr: SocketAddr, timing: SocketTiming) -> Self {
        Self { addr, timing }
    }
}

#[async_trait]
impl ControlChannel for SocketControl {
    async fn send(&self, command: &ControlCommand) -> Result<(), SupervisorError> {
        let mut stream = tokio::time::timeout(self.timing.connect_timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| SupervisorError::Transport {
                message: format!("connect to control port {} timed out", self.addr),
                source: None,
            })?
            .map_err(|e| SupervisorError::transport(format!("connect to control port {}", self.addr), e))?;

        // Let the banner and prompt arrive, then discard them.
        tokio::time::sleep(self.timing.banner_settle).await;
        let mut buf = [0u8; 1024];
        match tokio::time::timeout(self.timing.read_timeout, stream.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => {
                tracing::debug!(bytes = n, "discarded control-shell banner");
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "banner drain failed, continuing");
            }
            Err(_) => {
                tracing::debug!("no banner within read timeout, continuing");
            }
        }

        if let Err(e) = stream.write_all(format!("{}\r\n", command.line).as_bytes()).await {
            tracing::warn!(line = %command.line, error = %e, "command write failed, continuing");
        }

        tokio::time::sleep(command.settle).await;

        match tokio::time::timeout(self.timing.read_timeout, stream.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => {
                let reply = String::from_utf8_lossy(&buf[..n]);
                tracing::info!(line = %command.line, reply = %reply.trim(), "control reply");
            }
            Ok(Ok(_)) => {
                tracing::debug!(line = %command.line, "control connection closed without reply");
            }
            Ok(Err(e)) => {
                tracing::debug!(line = %command.line, error = %e, "reply read failed, ignoring");
            }
            Err(_) => {
                tracing::debug!(line = %command.line, "no reply within read timeout, ignoring");
            }
        }

        // Closed regardless of read outcome.
        Ok(())
    }

    fn endpoint(&self) -> ControlEndpoint {
        ControlEndpoint::Socket(self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn fast_timing() -> SocketTiming {
        SocketTiming {
            connect_timeout: Duration::from_millis(500),
            banner_settle: Duration::from_millis(30),
            read_timeout: Duration::from_millis(100),
        }
    }

    // -- command constructors ----------------------------------------------

    #[test]
    fn call_command_targets_destination_at_registrar() {
        let cmd = ControlCommand::call("12345", "sip.example.com");
        assert_eq!(cmd.line, "m sip:12345@sip.example.com");
    }

    #[test]
    fn hangup_and_quit_are_single_letters() {
        assert_eq!(ControlCommand::hangup().line, "h");
        assert_eq!(ControlCommand::quit().line, "q");
    }

    #[test]
    fn dtmf_prefixes_digits() {
        assert_eq!(ControlCommand::dtmf("42#").line, "#42#");
    }

    // -- PTY transport -----------------------------------------------------

    /// `Write` sink that appends into a shared buffer.
    #[derive(Clone)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn pty_send_writes_newline_terminated_line() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let control = PtyControl::new(Box::new(SharedSink(Arc::clone(&buf))));

        control.send(&ControlCommand::hangup()).await.unwrap();

        let written = buf.lock().unwrap().clone();
        assert_eq!(written, b"h\n");
        assert_eq!(control.endpoint(), ControlEndpoint::Pty);
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn pty_send_surfaces_write_failure() {
        let control = PtyControl::new(Box::new(FailingSink));
        let err = control.send(&ControlCommand::hangup()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Transport { .. }));
    }

    // -- socket transport --------------------------------------------------

    #[tokio::test]
    async fn socket_send_drains_banner_and_writes_crlf_command() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"-- worker command shell --\r\n> ").await.unwrap();

            let mut received = Vec::new();
            let mut byte = [0u8; 1];
            while sock.read_exact(&mut byte).await.is_ok() {
                received.push(byte[0]);
                if received.ends_with(b"\r\n") {
                    break;
                }
            }
            sock.write_all(b"Calling...\r\n").await.unwrap();
            received
        });

        let control = SocketControl::new(addr, fast_timing());
        let cmd = ControlCommand::call("12345", "sip.example.com")
            .with_settle(Duration::from_millis(30));
        control.send(&cmd).await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received, b"m sip:12345@sip.example.com\r\n");
    }

    #[tokio::test]
    async fn socket_send_fails_only_on_connect() {
        // Bind then drop to get a refusing port.
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let control = SocketControl::new(addr, fast_timing());
        let err = control.send(&ControlCommand::hangup()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Transport { .. }));
    }

    #[tokio::test]
    async fn socket_send_tolerates_immediate_close() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            drop(sock);
        });

        let control = SocketControl::new(addr, fast_timing());
        let cmd = ControlCommand::hangup().with_settle(Duration::from_millis(30));
        // Connect succeeded; every later failure is best-effort.
        control.send(&cmd).await.unwrap();

        server.await.unwrap();
    }

    #[tokio::test]
    async fn socket_send_tolerates_silent_peer() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            // No banner, no reply; hold the socket open for a while.
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(sock);
        });

        let control = SocketControl::new(addr, fast_timing());
        let cmd = ControlCommand::hangup().with_settle(Duration::from_millis(30));
        control.send(&cmd).await.unwrap();

        server.abort();
        let _ = server.await;
    }
}
