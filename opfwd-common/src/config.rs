// ABOUTME: defines the yaml configuration shared by the opfwd daemon and client.
// ABOUTME: validates whitelist entries and resolves default socket and config paths.

use std::path::{Path, PathBuf};
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

const DEFAULT_SOCKET_DIR: &str = ".ssh";
const DEFAULT_SOCKET_NAME: &str = "opfwd.sock";
const DEFAULT_CONFIG_DIR: &str = ".config/opfwd";
const DEFAULT_CONFIG_NAME: &str = "config.yaml";
const DEFAULT_OP_PROGRAM: &str = "op";
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Unix socket the daemon listens on. Defaults to `~/.ssh/opfwd.sock`.
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
    /// 1Password account passed verbatim as `--account`.
    #[serde(default)]
    pub account: String,
    /// Commands allowed by exact (trimmed) match.
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    /// Commands allowed when they start with one of these prefixes, compared
    /// byte for byte including any trailing space.
    #[serde(default)]
    pub allowed_prefixes: Vec<String>,
    /// Path or name of the `op` binary.
    #[serde(default)]
    pub op_path: Option<PathBuf>,
    /// Optional jsonl audit log of requests and verdicts.
    #[serde(default)]
    pub audit_path: Option<PathBuf>,
    /// How long shutdown waits for in-flight commands.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

fn default_drain_timeout_secs() -> u64 {
    DEFAULT_DRAIN_TIMEOUT_SECS
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("{0}")]
    Invalid(String),
    #[error("could not determine the current user's home directory")]
    NoHomeDir,
}

impl Config {
    pub fn socket_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.socket_path {
            Some(path) => Ok(path.clone()),
            None => default_socket_path(),
        }
    }

    pub fn op_program(&self) -> PathBuf {
        self.op_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OP_PROGRAM))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    fn validate(mut self) -> Result<Self, ConfigError> {
        if self.account.trim().is_empty() {
            return Err(ConfigError::Invalid("account is required in config".to_string()));
        }

        if matches!(&self.socket_path, Some(p) if p.as_os_str().is_empty()) {
            return Err(ConfigError::Invalid("socket_path must not be empty".to_string()));
        }

        self.allowed_commands = checked_entries("allowed_commands", self.allowed_commands)?
            .into_iter()
            .map(|entry| entry.trim().to_string())
            .collect();
        self.allowed_prefixes = checked_entries("allowed_prefixes", self.allowed_prefixes)?;
        Ok(self)
    }
}

// A blank prefix would match every command. Prefixes are otherwise kept as
// written: a trailing space is what stops `--vault Public ` matching `PublicX`.
fn checked_entries(field: &str, entries: Vec<String>) -> Result<Vec<String>, ConfigError> {
    if let Some(idx) = entries.iter().position(|entry| entry.trim().is_empty()) {
        return Err(ConfigError::Invalid(format!("{field}[{idx}] must not be blank")));
    }
    Ok(entries)
}

pub fn parse_config(input: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml::from_str(input)?;
    config.validate()
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&input)
}

pub fn default_socket_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(DEFAULT_SOCKET_DIR).join(DEFAULT_SOCKET_NAME))
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(DEFAULT_CONFIG_DIR).join(DEFAULT_CONFIG_NAME))
}
