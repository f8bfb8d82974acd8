//! Configuration file management for sipwarden.
//!
//! Provides a TOML-based config file at `~/.config/sipwarden/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.
//! `registrar`, `extension`, and `password` have no defaults; a hole in
//! the chain for any of them is a fatal startup error.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::{Deserialize, Serialize};

use sipwarden_core::config::WorkerParams;
use sipwarden_core::error::SupervisorError;
use sipwarden_core::launcher::TransportKind;

pub const DEFAULT_SIP_PORT: u16 = 5060;
pub const DEFAULT_CONTROL_PORT: u16 = 2323;
pub const DEFAULT_HTTP_BIND: &str = "0.0.0.0";
pub const DEFAULT_HTTP_PORT: u16 = 8099;
pub const DEFAULT_AUTO_ANSWER: u16 = 200;

// -----------------------------------------------------------------------
// CLI flags
// -----------------------------------------------------------------------

#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// SIP registrar host (overrides SIPWARDEN_REGISTRAR env var)
    #[arg(long, global = true)]
    pub registrar: Option<String>,

    /// SIP extension / account id (overrides SIPWARDEN_EXTENSION env var)
    #[arg(long, global = true)]
    pub extension: Option<String>,

    /// SIP account password (overrides SIPWARDEN_PASSWORD env var)
    #[arg(long, global = true)]
    pub password: Option<String>,

    /// Control transport: pty or socket (overrides SIPWARDEN_TRANSPORT)
    #[arg(long, global = true)]
    pub transport: Option<String>,

    /// Local SIP listen port
    #[arg(long, global = true)]
    pub local_port: Option<u16>,

    /// Worker telnet control port (socket transport only)
    #[arg(long, global = true)]
    pub control_port: Option<u16>,

    /// HTTP API bind address
    #[arg(long, global = true)]
    pub bind: Option<String>,

    /// HTTP API port
    #[arg(long, global = true)]
    pub http_port: Option<u16>,
}

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub sip: SipSection,
    #[serde(default)]
    pub control: ControlSection,
    #[serde(default)]
    pub http: HttpSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SipSection {
    pub registrar: Option<String>,
    pub extension: Option<String>,
    pub password: Option<String>,
    pub realm: Option<String>,
    pub local_port: Option<u16>,
    pub null_audio: Option<bool>,
    pub auto_answer: Option<u16>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ControlSection {
    /// "pty" or "socket".
    pub transport: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HttpSection {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the sipwarden config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/sipwarden` or
/// `~/.config/sipwarden`. We intentionally ignore the platform-specific
/// `dirs::config_dir()` (which returns `~/Library/Application Support`
/// on macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("sipwarden");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("sipwarden")
}

/// Return the path to the sipwarden config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct SipwardenConfig {
    pub params: WorkerParams,
    pub transport: TransportKind,
    pub http_bind: String,
    pub http_port: u16,
}

impl SipwardenConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default. The three account keys have no default.
    pub fn resolve(args: &WorkerArgs) -> Result<Self> {
        let file = load_config().unwrap_or_default();

        let registrar = args
            .registrar
            .clone()
            .or_else(|| env_string("SIPWARDEN_REGISTRAR"))
            .or(file.sip.registrar)
            .ok_or(SupervisorError::MissingParam("registrar"))?;
        let extension = args
            .extension
            .clone()
            .or_else(|| env_string("SIPWARDEN_EXTENSION"))
            .or(file.sip.extension)
            .ok_or(SupervisorError::MissingParam("extension"))?;
        let password = args
            .password
            .clone()
            .or_else(|| env_string("SIPWARDEN_PASSWORD"))
            .or(file.sip.password)
            .ok_or(SupervisorError::MissingParam("password"))?;

        let realm = env_string("SIPWARDEN_REALM")
            .or(file.sip.realm)
            .unwrap_or_else(|| "*".to_string());
        let local_port = args
            .local_port
            .or(env_parsed("SIPWARDEN_LOCAL_PORT")?)
            .or(file.sip.local_port)
            .unwrap_or(DEFAULT_SIP_PORT);
        let control_port = args
            .control_port
            .or(env_parsed("SIPWARDEN_CONTROL_PORT")?)
            .or(file.control.port)
            .unwrap_or(DEFAULT_CONTROL_PORT);

        let transport_name = args
            .transport
            .clone()
            .or_else(|| env_string("SIPWARDEN_TRANSPORT"))
            .or(file.control.transport)
            .unwrap_or_else(|| "pty".to_string());
        let transport = parse_transport(&transport_name)?;

        let http_bind = args
            .bind
            .clone()
            .or_else(|| env_string("SIPWARDEN_HTTP_BIND"))
            .or(file.http.bind)
            .unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string());
        let http_port = args
            .http_port
            .or(env_parsed("SIPWARDEN_HTTP_PORT")?)
            .or(file.http.port)
            .unwrap_or(DEFAULT_HTTP_PORT);

        let params = WorkerParams {
            extension,
            registrar,
            password,
            realm,
            local_port,
            control_port,
            null_audio: file.sip.null_audio.unwrap_or(true),
            auto_answer: Some(file.sip.auto_answer.unwrap_or(DEFAULT_AUTO_ANSWER)),
        };

        Ok(Self {
            params,
            transport,
            http_bind,
            http_port,
        })
    }
}

/// Parse a transport name from a flag, env var, or config file.
pub fn parse_transport(name: &str) -> Result<TransportKind> {
    match name {
        "pty" => Ok(TransportKind::Pty),
        "socket" => Ok(TransportKind::Socket),
        other => bail!("unknown transport {other:?} (expected \"pty\" or \"socket\")"),
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => match raw.parse() {
            Ok(value) => Ok(Some(value)),
            Err(e) => bail!("invalid value in {key} env var: {e}"),
        },
        None => Ok(None),
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    fn no_args() -> WorkerArgs {
        WorkerArgs {
            registrar: None,
            extension: None,
            password: None,
            transport: None,
            local_port: None,
            control_port: None,
            bind: None,
            http_port: None,
        }
    }

    fn clear_sipwarden_env() {
        for key in [
            "SIPWARDEN_REGISTRAR",
            "SIPWARDEN_EXTENSION",
            "SIPWARDEN_PASSWORD",
            "SIPWARDEN_REALM",
            "SIPWARDEN_LOCAL_PORT",
            "SIPWARDEN_CONTROL_PORT",
            "SIPWARDEN_TRANSPORT",
            "SIPWARDEN_HTTP_BIND",
            "SIPWARDEN_HTTP_PORT",
        ] {
            unsafe { std::env::remove_var(key) };
        }
    }

    /// Point HOME/XDG_CONFIG_HOME at an empty temp dir so a real config
    /// file on the test machine cannot leak into the chain.
    fn isolate_config(tmp: &tempfile::TempDir) {
        unsafe { std::env::set_var("HOME", tmp.path()) };
        unsafe { std::env::remove_var("XDG_CONFIG_HOME") };
    }

    #[test]
    fn resolve_errors_when_account_keys_missing() {
        let _lock = lock_env();
        clear_sipwarden_env();
        let tmp = tempfile::TempDir::new().unwrap();
        isolate_config(&tmp);

        let result = SipwardenConfig::resolve(&no_args());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("registrar"), "unexpected error: {msg}");
    }

    #[test]
    fn resolve_with_env_vars_only() {
        let _lock = lock_env();
        clear_sipwarden_env();
        let tmp = tempfile::TempDir::new().unwrap();
        isolate_config(&tmp);

        unsafe { std::env::set_var("SIPWARDEN_REGISTRAR", "sip.example.test") };
        unsafe { std::env::set_var("SIPWARDEN_EXTENSION", "1001") };
        unsafe { std::env::set_var("SIPWARDEN_PASSWORD", "secret") };

        let config = SipwardenConfig::resolve(&no_args()).unwrap();
        assert_eq!(config.params.registrar, "sip.example.test");
        assert_eq!(config.params.extension, "1001");
        assert_eq!(config.params.local_port, DEFAULT_SIP_PORT);
        assert_eq!(config.params.control_port, DEFAULT_CONTROL_PORT);
        assert_eq!(config.transport, TransportKind::Pty);
        assert_eq!(config.http_bind, DEFAULT_HTTP_BIND);
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);

        clear_sipwarden_env();
    }

    #[test]
    fn cli_flags_override_env_vars() {
        let _lock = lock_env();
        clear_sipwarden_env();
        let tmp = tempfile::TempDir::new().unwrap();
        isolate_config(&tmp);

        unsafe { std::env::set_var("SIPWARDEN_REGISTRAR", "env.example.test") };
        unsafe { std::env::set_var("SIPWARDEN_EXTENSION", "2002") };
        unsafe { std::env::set_var("SIPWARDEN_PASSWORD", "env-secret") };
        unsafe { std::env::set_var("SIPWARDEN_TRANSPORT", "pty") };

        let args = WorkerArgs {
            registrar: Some("cli.example.test".to_string()),
            transport: Some("socket".to_string()),
            http_port: Some(9000),
            ..no_args()
        };
        let config = SipwardenConfig::resolve(&args).unwrap();
        assert_eq!(config.params.registrar, "cli.example.test");
        assert_eq!(config.transport, TransportKind::Socket);
        assert_eq!(config.http_port, 9000);

        clear_sipwarden_env();
    }

    #[test]
    fn config_file_fills_chain_holes() {
        let _lock = lock_env();
        clear_sipwarden_env();
        let tmp = tempfile::TempDir::new().unwrap();
        isolate_config(&tmp);

        let dir = tmp.path().join(".config").join("sipwarden");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("config.toml"),
            r#"
[sip]
registrar = "file.example.test"
extension = "3003"
password = "file-secret"
null_audio = false

[control]
transport = "socket"
port = 2600

[http]
port = 8200
"#,
        )
        .unwrap();

        let config = SipwardenConfig::resolve(&no_args()).unwrap();
        assert_eq!(config.params.registrar, "file.example.test");
        assert_eq!(config.params.control_port, 2600);
        assert!(!config.params.null_audio);
        assert_eq!(config.transport, TransportKind::Socket);
        assert_eq!(config.http_port, 8200);
    }

    #[test]
    fn unknown_transport_is_rejected() {
        let err = parse_transport("telegraph").unwrap_err();
        assert!(err.to_string().contains("telegraph"));
    }

    #[test]
    fn invalid_port_env_var_is_a_parse_error() {
        let _lock = lock_env();
        clear_sipwarden_env();
        unsafe { std::env::set_var("SIPWARDEN_HTTP_PORT", "not-a-port") };

        let result: Result<Option<u16>> = env_parsed("SIPWARDEN_HTTP_PORT");
        assert!(result.is_err());

        clear_sipwarden_env();
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let _lock = lock_env();
        let path = config_path();
        assert!(
            path.ends_with("sipwarden/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
