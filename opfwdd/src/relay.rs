// ABOUTME: runs an allowed op command and streams its stdout and stderr to the caller.
// ABOUTME: both pipes are drained to eof before the relay reports the exit status.

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::tool::SecretTool;

const CHUNK_BYTES: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to start {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for {}: {source}", .program.display())]
    Wait {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What happened to a relayed command. The exit status is informational: the
/// tool's own stderr has already told the caller why it failed.
#[derive(Debug)]
pub struct ExitOutcome {
    pub status: ExitStatus,
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
    /// First error writing to the caller. Output after it was discarded.
    pub sink_error: Option<io::Error>,
}

pub async fn run<W>(tool: &SecretTool, argv: &[String], sink: &mut W) -> Result<ExitOutcome, RelayError>
where
    W: AsyncWrite + Unpin,
{
    let mut child = tool.command(argv).spawn().map_err(|source| RelayError::Spawn {
        program: tool.program().to_path_buf(),
        source,
    })?;
    debug!(pid = child.id(), "spawned op");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (drained, waited) = tokio::join!(drain(stdout, stderr, sink), child.wait());

    let status = waited.map_err(|source| RelayError::Wait {
        program: tool.program().to_path_buf(),
        source,
    })?;

    Ok(ExitOutcome {
        status,
        stdout_bytes: drained.stdout_bytes,
        stderr_bytes: drained.stderr_bytes,
        sink_error: drained.sink_error,
    })
}

#[derive(Debug, Default)]
struct Drained {
    stdout_bytes: u64,
    stderr_bytes: u64,
    sink_error: Option<io::Error>,
}

#[derive(Debug, Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

/// Copies both readers into `sink` as data arrives until both hit eof.
async fn drain<O, E, W>(mut stdout: Option<O>, mut stderr: Option<E>, sink: &mut W) -> Drained
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut out_buf = vec![0u8; CHUNK_BYTES];
    let mut err_buf = vec![0u8; CHUNK_BYTES];
    let mut drained = Drained::default();

    loop {
        let (pipe, read) = tokio::select! {
            read = read_some(&mut stdout, &mut out_buf), if stdout.is_some() => (Pipe::Stdout, read),
            read = read_some(&mut stderr, &mut err_buf), if stderr.is_some() => (Pipe::Stderr, read),
            else => break,
        };

        let n = match read {
            Ok(0) => {
                close_pipe(pipe, &mut stdout, &mut stderr);
                continue;
            }
            Ok(n) => n,
            Err(err) => {
                warn!(?pipe, error = %err, "failed to read from op");
                close_pipe(pipe, &mut stdout, &mut stderr);
                continue;
            }
        };

        let chunk = match pipe {
            Pipe::Stdout => {
                drained.stdout_bytes += n as u64;
                &out_buf[..n]
            }
            Pipe::Stderr => {
                drained.stderr_bytes += n as u64;
                &err_buf[..n]
            }
        };

        if drained.sink_error.is_none() {
            if let Err(err) = sink.write_all(chunk).await {
                warn!(error = %err, "caller went away, discarding remaining output");
                drained.sink_error = Some(err);
            }
        }
    }

    if drained.sink_error.is_none() {
        if let Err(err) = sink.flush().await {
            drained.sink_error = Some(err);
        }
    }
    drained
}

async fn read_some<R>(reader: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

fn close_pipe<O, E>(pipe: Pipe, stdout: &mut Option<O>, stderr: &mut Option<E>) {
    match pipe {
        Pipe::Stdout => *stdout = None,
        Pipe::Stderr => *stderr = None,
    }
}
