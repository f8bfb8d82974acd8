mod check_cmd;
mod config;
mod serve_cmd;

use clap::{Parser, Subcommand};

use config::{SipwardenConfig, WorkerArgs};

#[derive(Parser)]
#[command(
    name = "sipwarden",
    about = "Supervisor and HTTP control bridge for an external SIP softphone worker"
)]
struct Cli {
    #[command(flatten)]
    worker: WorkerArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the worker, start the watchdog, and serve the HTTP control API
    Serve,
    /// Resolve the worker executable and print the rendered config (no process spawned)
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let resolved = SipwardenConfig::resolve(&cli.worker)?;

    match cli.command {
        Commands::Serve => serve_cmd::run_serve(resolved).await?,
        Commands::Check => check_cmd::run_check(&resolved)?,
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::{Mutex, MutexGuard, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    /// Serialize tests that mutate process-wide environment variables.
    pub fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::Cli;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
