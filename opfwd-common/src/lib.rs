// ABOUTME: shares configuration and wire protocol helpers between opfwdd and the opfwd client.
// ABOUTME: the protocol is one newline-terminated command line in, raw tool output back.

mod config;

pub use config::{
    default_config_path, default_socket_path, load_config, parse_config, Config, ConfigError,
};

/// Longest request line the daemon will read, terminator included.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Every daemon-generated response line starts with this.
pub const ERROR_PREFIX: &str = "Error: ";

/// Renders a single `Error: ...` response line. Multi-line messages (such as
/// captured tool output) are folded onto one line.
pub fn error_line(message: &str) -> String {
    let folded = message
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" | ");
    format!("{ERROR_PREFIX}{folded}\n")
}

/// `command` is the trimmed request line and is echoed verbatim.
pub fn rejection_line(command: &str) -> String {
    format!("{ERROR_PREFIX}Command not allowed: {command}\n")
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RequestLineError {
    #[error("no command given")]
    Empty,
    #[error("command must not contain line breaks")]
    LineBreak,
    #[error("command exceeds {MAX_REQUEST_BYTES} bytes")]
    TooLong,
}

/// Joins command arguments into the newline-terminated request the daemon
/// expects. Arguments are joined with single spaces; the daemon splits on
/// whitespace, so quoting is not preserved.
pub fn request_line<S: AsRef<str>>(args: &[S]) -> Result<String, RequestLineError> {
    let joined = args.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" ");
    if joined.trim().is_empty() {
        return Err(RequestLineError::Empty);
    }
    if joined.contains(['\n', '\r']) {
        return Err(RequestLineError::LineBreak);
    }
    if joined.len() + 1 > MAX_REQUEST_BYTES {
        return Err(RequestLineError::TooLong);
    }
    Ok(format!("{joined}\n"))
}
