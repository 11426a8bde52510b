// ABOUTME: hosts the unix socket server that forwards whitelisted command lines to op.
// ABOUTME: one task per connection: read a line, check policy, sign in, relay output, close.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use futures::FutureExt;
use opfwd_common::{error_line, rejection_line, Config, MAX_REQUEST_BYTES};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::audit::{AuditLog, PeerCredentials, Verdict};
use crate::auth::Authenticator;
use crate::policy::Policy;
use crate::relay;
use crate::socket::{self, BoundSocket};
use crate::tool::{argument_vector, quoted, SecretTool};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub socket_path: PathBuf,
    pub account: String,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub identity: ServerIdentity,
    pub policy: Policy,
    pub tool: SecretTool,
    pub audit_path: Option<PathBuf>,
    pub drain_timeout: Duration,
}

impl ServerSettings {
    /// Resolves the socket path and locates the op binary.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let tool = SecretTool::locate(&config.op_program())?;
        Ok(Self {
            identity: ServerIdentity {
                socket_path: config.socket_path()?,
                account: config.account.clone(),
            },
            policy: Policy::from_config(config),
            tool,
            audit_path: config.audit_path.clone(),
            drain_timeout: config.drain_timeout(),
        })
    }
}

/// Binds the socket and serves until `shutdown` is cancelled.
pub async fn run(settings: ServerSettings, shutdown: CancellationToken) -> anyhow::Result<()> {
    let socket = socket::bind(&settings.identity.socket_path)?;

    info!(socket = %socket.path().display(), "server listening");
    info!(commands = ?settings.policy.exact_commands().collect::<Vec<_>>(), "allowed exact commands");
    info!(prefixes = ?settings.policy.prefixes().collect::<Vec<_>>(), "allowed command prefixes");
    info!(
        account = %settings.identity.account,
        op = %settings.tool.program().display(),
        "using 1Password account"
    );

    let drain_timeout = settings.drain_timeout;
    let supervisor = Arc::new(Supervisor::new(settings));
    let tracker = TaskTracker::new();

    accept_loop(&socket, &supervisor, &shutdown, &tracker).await;
    socket.close();

    tracker.close();
    if !tracker.is_empty() {
        info!(in_flight = tracker.len(), "waiting for in-flight connections");
    }
    if tokio::time::timeout(drain_timeout, tracker.wait()).await.is_err() {
        warn!(abandoned = tracker.len(), "drain timeout elapsed, abandoning in-flight connections");
    }
    info!("server shutdown completed");
    Ok(())
}

async fn accept_loop(
    socket: &BoundSocket,
    supervisor: &Arc<Supervisor>,
    shutdown: &CancellationToken,
    tracker: &TaskTracker,
) {
    let mut next_id: u64 = 0;
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = socket.accept() => accepted,
        };

        match accepted {
            Ok(stream) => {
                next_id += 1;
                let supervisor = Arc::clone(supervisor);
                let span = info_span!("connection", id = next_id);
                tracker.spawn(
                    guarded(async move { supervisor.handle(stream).await }).instrument(span),
                );
            }
            Err(err) => {
                warn!(error = %err, "error accepting connection");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                }
            }
        }
    }
}

/// Per-connection fault boundary: errors and panics are logged here and go
/// no further. Whatever the future owned, including the connection, is
/// dropped on the way out.
async fn guarded<F>(connection: F)
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(connection).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %format!("{err:#}"), "connection failed"),
        Err(panic) => error!(panic = panic_message(panic.as_ref()), "connection handler panicked"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}

#[derive(Debug)]
enum Request {
    Line(String),
    Unterminated,
    TooLong,
}

/// Reads one `\n`-terminated line and returns it trimmed.
async fn read_request<R>(reader: R) -> std::io::Result<Request>
where
    R: AsyncRead + Unpin,
{
    let mut limited = BufReader::new(reader).take(MAX_REQUEST_BYTES as u64);
    let mut line = Vec::new();
    limited.read_until(b'\n', &mut line).await?;

    if line.last() == Some(&b'\n') {
        return Ok(Request::Line(String::from_utf8_lossy(&line).trim().to_string()));
    }
    if line.len() >= MAX_REQUEST_BYTES {
        return Ok(Request::TooLong);
    }
    Ok(Request::Unterminated)
}

#[derive(Debug)]
struct Supervisor {
    account: String,
    policy: Policy,
    tool: Arc<SecretTool>,
    auth: Authenticator,
    audit: Option<AuditLog>,
}

impl Supervisor {
    fn new(settings: ServerSettings) -> Self {
        let tool = Arc::new(settings.tool);
        Self {
            account: settings.identity.account,
            policy: settings.policy,
            auth: Authenticator::new(Arc::clone(&tool)),
            tool,
            audit: settings.audit_path.map(AuditLog::new),
        }
    }

    async fn handle(&self, mut stream: UnixStream) -> anyhow::Result<()> {
        let peer = PeerCredentials::of(&stream);
        debug!(?peer, "accepted connection");
        let (reader, mut writer) = stream.split();

        let command = match read_request(reader).await.context("reading request")? {
            Request::Line(command) => command,
            Request::Unterminated => {
                debug!("connection closed before a complete line arrived");
                return Ok(());
            }
            Request::TooLong => {
                warn!(limit = MAX_REQUEST_BYTES, "request line too long, closing connection");
                return Ok(());
            }
        };
        info!(%command, "received input");

        let (verdict, exit_code) = self.respond(&command, &mut writer).await;
        self.record(peer, &command, verdict, exit_code).await;

        if let Err(err) = writer.shutdown().await {
            debug!(error = %err, "failed to shut down connection");
        }
        Ok(())
    }

    async fn respond<W>(&self, command: &str, writer: &mut W) -> (Verdict, Option<i32>)
    where
        W: AsyncWrite + Unpin,
    {
        if !self.policy.is_allowed(command) {
            warn!(%command, "command not allowed");
            reply(writer, &rejection_line(command)).await;
            return (Verdict::Rejected, None);
        }

        if let Err(err) = self.auth.ensure_signed_in(&self.account).await {
            warn!(error = %err, "error ensuring 1Password sign-in");
            let message = format!("Could not sign in to 1Password: {err}");
            reply(writer, &error_line(&message)).await;
            return (Verdict::AuthFailed, None);
        }

        let argv = argument_vector(&self.account, command);
        info!(args = %quoted(&argv), "executing op");

        match relay::run(&self.tool, &argv, writer).await {
            Ok(outcome) => {
                if outcome.status.success() {
                    info!(
                        status = %outcome.status,
                        stdout_bytes = outcome.stdout_bytes,
                        stderr_bytes = outcome.stderr_bytes,
                        "command completed"
                    );
                } else {
                    warn!(
                        status = %outcome.status,
                        stdout_bytes = outcome.stdout_bytes,
                        stderr_bytes = outcome.stderr_bytes,
                        "command execution error"
                    );
                }
                if let Some(err) = &outcome.sink_error {
                    warn!(error = %err, "output was not fully delivered");
                }
                (Verdict::Relayed, outcome.status.code())
            }
            Err(err) => {
                warn!(error = %err, "error starting command");
                reply(writer, &error_line(&err.to_string())).await;
                (Verdict::SpawnFailed, None)
            }
        }
    }

    async fn record(
        &self,
        peer: Option<PeerCredentials>,
        command: &str,
        verdict: Verdict,
        exit_code: Option<i32>,
    ) {
        let Some(audit) = &self.audit else {
            return;
        };
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        if let Err(err) = audit.append(now_ms, peer, command, verdict, exit_code).await {
            warn!(error = %format!("{err:#}"), "failed to write audit record");
        }
    }
}

async fn reply<W>(writer: &mut W, line: &str)
where
    W: AsyncWrite + Unpin,
{
    if let Err(err) = writer.write_all(line.as_bytes()).await {
        warn!(error = %err, "error writing response");
    }
}
