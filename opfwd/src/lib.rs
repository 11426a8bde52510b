// ABOUTME: provides opfwd client helpers for locating the daemon socket and forwarding one command.
// ABOUTME: the response is copied through untouched until the daemon closes the connection.

use std::path::{Path, PathBuf};

use anyhow::Context;
use opfwd_common::request_line;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;

pub fn resolve_socket_path(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => Ok(opfwd_common::default_socket_path()?),
    }
}

pub fn ensure_socket_exists(socket_path: &Path) -> anyhow::Result<()> {
    if socket_path.exists() {
        return Ok(());
    }
    Err(anyhow::anyhow!(
        "Socket {} not found. Make sure the opfwd server is running and the socket is forwarded.",
        socket_path.display()
    ))
}

/// Sends `args` as one request line and copies the response into `out`.
/// Returns the number of response bytes.
pub async fn forward<S, W>(socket_path: &Path, args: &[S], out: &mut W) -> anyhow::Result<u64>
where
    S: AsRef<str>,
    W: AsyncWrite + Unpin,
{
    let line = request_line(args)?;
    ensure_socket_exists(socket_path)?;

    let mut stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("connecting to {}", socket_path.display()))?;
    stream.write_all(line.as_bytes()).await?;
    stream.shutdown().await?;

    let copied = tokio::io::copy(&mut stream, out).await?;
    out.flush().await?;
    Ok(copied)
}
