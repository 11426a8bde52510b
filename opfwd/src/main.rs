// ABOUTME: provides the opfwd cli that sends one 1Password command to the forwarding daemon.
// ABOUTME: prints whatever the daemon returns, tool output or an error line.

use std::path::PathBuf;

use clap::Parser;

use opfwd::{forward, resolve_socket_path};

#[derive(Debug, Parser)]
#[command(name = "opfwd", version, about)]
struct Args {
    /// Daemon socket (default: ~/.ssh/opfwd.sock).
    #[arg(long)]
    socket_path: Option<PathBuf>,

    /// The op command and its arguments, without the `op` itself.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let socket_path = resolve_socket_path(args.socket_path)?;
    forward(&socket_path, &args.command, &mut tokio::io::stdout()).await?;
    Ok(())
}
