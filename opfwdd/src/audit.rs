// ABOUTME: appends one json line per forwarded request to an optional audit log.
// ABOUTME: records who asked for which command and what happened, never the output.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

/// Applied when the log is created; an existing file keeps its mode.
const AUDIT_FILE_MODE: u32 = 0o600;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PeerCredentials {
    pub pid: Option<i32>,
    pub uid: u32,
    pub gid: u32,
}

impl PeerCredentials {
    pub fn of(stream: &UnixStream) -> Option<Self> {
        let cred = stream.peer_cred().ok()?;
        Some(Self {
            pid: cred.pid(),
            uid: cred.uid(),
            gid: cred.gid(),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Rejected,
    AuthFailed,
    SpawnFailed,
    Relayed,
}

#[derive(Debug, Serialize)]
struct AuditRecord<'a> {
    ts_unix_ms: u64,
    peer: Option<PeerCredentials>,
    command: &'a str,
    verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(
        &self,
        ts_unix_ms: u64,
        peer: Option<PeerCredentials>,
        command: &str,
        verdict: Verdict,
        exit_code: Option<i32>,
    ) -> anyhow::Result<()> {
        let record = AuditRecord {
            ts_unix_ms,
            peer,
            command,
            verdict,
            exit_code,
        };

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .mode(AUDIT_FILE_MODE)
            .open(&self.path)
            .await
            .with_context(|| format!("open audit log at {}", self.path.display()))?;

        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
