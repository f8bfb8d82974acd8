//! Supervision core for an external SIP softphone worker.
//!
//! The worker is an opaque interactive binary (stock pjsua). This crate
//! owns its whole lifecycle: generating its config file, finding the
//! executable, launching it wired to a PTY or to pipes, draining its
//! output into the log stream, probing readiness, bridging one-line
//! commands over the chosen control transport, and restarting it when
//! it dies. The HTTP surface lives in the CLI crate; everything here is
//! transport-agnostic library code.

pub mod config;
pub mod control;
pub mod drain;
pub mod error;
pub mod launcher;
pub mod locator;
pub mod probe;
pub mod supervisor;
mod watchdog;

pub use config::WorkerParams;
pub use control::{ControlChannel, ControlCommand, ControlEndpoint, SocketTiming};
pub use error::SupervisorError;
pub use launcher::TransportKind;
pub use locator::WorkerLocator;
pub use probe::ProbeConfig;
pub use supervisor::{StatusSnapshot, Supervisor, SupervisorTiming};
