// ABOUTME: runs the daemon that forwards whitelisted 1Password cli commands from a unix socket.
// ABOUTME: loads the yaml config, installs logging and signal handling, then serves until stopped.

mod audit;
mod auth;
mod policy;
mod relay;
mod server;
mod shutdown;
mod socket;
mod telemetry;
mod tool;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::server::ServerSettings;
use crate::telemetry::LogFormat;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nCommit: ",
    env!("OPFWD_BUILD_COMMIT"),
    "\nBuild Date: ",
    env!("OPFWD_BUILD_DATE"),
    "\nRust Version: ",
    env!("OPFWD_BUILD_RUSTC"),
);

#[derive(Debug, Parser)]
#[command(name = "opfwdd", version, long_version = LONG_VERSION, about)]
struct Args {
    /// Config file (default: ~/.config/opfwd/config.yaml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `socket_path` from the config file.
    #[arg(long)]
    socket_path: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init(args.log_format)?;

    let config_path = match args.config {
        Some(path) => path,
        None => opfwd_common::default_config_path()?,
    };
    let mut config = opfwd_common::load_config(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    if let Some(socket_path) = args.socket_path {
        config.socket_path = Some(socket_path);
    }

    let settings = ServerSettings::from_config(&config)?;

    let graceful = CancellationToken::new();
    let immediate = CancellationToken::new();
    let watcher = shutdown::spawn_signal_watcher(graceful.clone(), immediate.clone());

    // Dropping the server future still removes the socket file.
    let served = tokio::select! {
        served = server::run(settings, graceful.clone()) => served,
        _ = immediate.cancelled() => {
            warn!("exiting with connections still in flight");
            Ok(())
        }
    };

    graceful.cancel();
    immediate.cancel();
    if let Err(err) = watcher.await {
        error!(error = %err, "signal watcher failed");
    }
    served
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn long_version_carries_build_metadata() {
        let version = Args::command().render_long_version();
        assert!(version.contains(env!("CARGO_PKG_VERSION")));
        assert!(version.contains("Commit: "));
        assert!(version.contains("Build Date: "));
        assert!(version.contains("Rust Version: "));
    }

    #[test]
    fn socket_path_and_log_format_flags_parse() {
        let args = Args::try_parse_from([
            "opfwdd",
            "--socket-path",
            "/tmp/opfwd.sock",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(args.socket_path, Some(PathBuf::from("/tmp/opfwd.sock")));
        assert_eq!(args.log_format, LogFormat::Json);
        assert_eq!(args.config, None);
    }
}
