//! Worker configuration materializer.
//!
//! Renders the worker's directive file (one `--key value` line per
//! directive, the format the softphone binary reads with `--config-file`)
//! from a fixed set of named parameters and writes it to a well-known path,
//! overwriting any prior version. Identical inputs produce a byte-identical
//! file. Parameter *values* are not validated here; presence checks belong
//! to the caller that assembles [`WorkerParams`].

use std::path::{Path, PathBuf};

use crate::error::SupervisorError;
use crate::launcher::TransportKind;

/// Named parameters for the worker's registration and media setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerParams {
    /// SIP extension / account user part.
    pub extension: String,
    /// Registrar host (bare host or host:port).
    pub registrar: String,
    /// Account password.
    pub password: String,
    /// Authentication realm. `*` matches any realm.
    pub realm: String,
    /// Local SIP signaling port.
    pub local_port: u16,
    /// Loopback control port for the telnet-style command shell
    /// (used only by the socket transport).
    pub control_port: u16,
    /// Run without audio devices.
    pub null_audio: bool,
    /// Auto-answer incoming calls with this status code.
    pub auto_answer: Option<u16>,
}

impl WorkerParams {
    /// Render the directive file contents for the given transport.
    ///
    /// The socket transport appends the command-shell directives so the
    /// worker opens its loopback control port instead of reading commands
    /// from its terminal.
    pub fn render(&self, transport: TransportKind) -> String {
        let mut out = String::new();
        out.push_str(&format!("--id sip:{}@{}\n", self.extension, self.registrar));
        out.push_str(&format!("--registrar sip:{}\n", self.registrar));
        out.push_str(&format!("--realm {}\n", self.realm));
        out.push_str(&format!("--username {}\n", self.extension));
        out.push_str(&format!("--password {}\n", self.password));
        if self.null_audio {
            out.push_str("--null-audio\n");
        }
        if let Some(code) = self.auto_answer {
            out.push_str(&format!("--auto-answer {code}\n"));
        }
        out.push_str(&format!("--local-port={}\n", self.local_port));

        if transport == TransportKind::Socket {
            out.push_str("--use-cli\n");
            out.push_str(&format!("--cli-telnet-port={}\n", self.control_port));
            out.push_str("--no-cli-console\n");
        }

        out
    }
}

/// Default location of the generated worker config file.
pub fn default_config_path() -> PathBuf {
    std::env::temp_dir().join("sipwarden-worker.conf")
}

/// Write the rendered directive file to `path`, overwriting any prior
/// version. Fails only on filesystem error.
pub fn materialize(
    params: &WorkerParams,
    transport: TransportKind,
    path: &Path,
) -> Result<(), SupervisorError> {
    let contents = params.render(transport);
    std::fs::write(path, contents).map_err(|source| SupervisorError::ConfigWrite {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "worker config written");
    Ok(())
}
