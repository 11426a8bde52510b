// ABOUTME: builds every invocation of the 1password cli the daemon makes.
// ABOUTME: commands are always scoped to the configured account with --account.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
#[error(
    "the 1Password CLI ({}) was not found in your system PATH.\n\n\
     To install it on macOS:\n\n    brew install 1password-cli\n\n\
     Error details: {source}",
    .program.display()
)]
pub struct ToolNotFound {
    program: PathBuf,
    #[source]
    source: which::Error,
}

#[derive(Debug, Clone)]
pub struct SecretTool {
    program: PathBuf,
}

impl SecretTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Resolves `program` on `PATH` (or checks it directly when it contains a
    /// path separator) so a missing cli fails at startup rather than on the
    /// first request.
    pub fn locate(program: &Path) -> Result<Self, ToolNotFound> {
        let resolved = which::which(program).map_err(|source| ToolNotFound {
            program: program.to_path_buf(),
            source,
        })?;
        Ok(Self::new(resolved))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// `op --account <id> account get`, with all stdio discarded.
    pub fn status_command(&self, account: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--account", account, "account", "get"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }

    /// `op signin --account <id>`, with output captured for diagnostics.
    pub fn signin_command(&self, account: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["signin", "--account", account])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    pub fn command(&self, argv: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

/// `["--account", account] ++ command.split_whitespace()`.
///
/// Splitting is naive: quotes and escapes are passed through as ordinary
/// characters, so arguments cannot contain whitespace.
pub fn argument_vector(account: &str, command: &str) -> Vec<String> {
    ["--account", account]
        .into_iter()
        .chain(command.split_whitespace())
        .map(str::to_string)
        .collect()
}

/// Renders argv the way it is logged: every argument single-quoted.
pub fn quoted(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| format!("'{arg}'"))
        .collect::<Vec<_>>()
        .join(" ")
}
