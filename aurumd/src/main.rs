//! Daemon entrypoint.
//!
//! Exit codes:
//! - 0: normal shutdown
//! - 1: configuration error
//! - 2: unrecoverable bridge failure
//! - 3: shutdown with positions requiring manual handling

use aurumd::{Config, Daemon, DaemonError, ExitStatus};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("aurumd=info".parse()?))
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Configuration error");
            std::process::exit(1);
        }
    };

    match Daemon::new(config).run().await {
        Ok(ExitStatus::Clean) => Ok(()),
        Ok(ExitStatus::RequiresManual) => std::process::exit(3),
        Err(e) => {
            error!(error = %e, "Fatal error");
            let code = match e {
                DaemonError::Config(_) => 1,
                DaemonError::Bridge(_) => 2,
                _ => 2,
            };
            std::process::exit(code);
        }
    }
}
