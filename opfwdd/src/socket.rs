// ABOUTME: creates, secures, and removes the daemon's unix socket file.
// ABOUTME: an existing file at the socket path means another instance owns it.

use std::fs::{self, DirBuilder, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

/// Socket file permissions (owner read/write only).
const SOCKET_MODE: u32 = 0o600;

/// Permissions for directories created to hold the socket.
const DIRECTORY_MODE: u32 = 0o700;

/// Umask held while binding so the socket never exists with group or
/// world access, even before the chmod.
const BIND_UMASK: u32 = 0o077;

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error(
        "socket file already exists at {shown}. Another server might be running.\n\
         If you're sure no other server is running, remove it manually with: rm {shown}",
        shown = .path.display()
    )]
    AlreadyBound { path: PathBuf },
    #[error("failed to create socket directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to listen on socket {}: {source}", .path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to set permissions on socket {}: {source}", .path.display())]
    Permissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A listening socket together with the file it owns.
#[derive(Debug)]
pub struct BoundSocket {
    listener: UnixListener,
    path: PathBuf,
}

impl BoundSocket {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn accept(&self) -> io::Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }

    /// Stops listening and removes the socket file.
    pub fn close(self) {
        drop(self);
    }
}

// Also covers the server future being abandoned mid-drain.
impl Drop for BoundSocket {
    fn drop(&mut self) {
        teardown(&self.path);
    }
}

pub fn bind(path: &Path) -> Result<BoundSocket, SocketError> {
    if fs::symlink_metadata(path).is_ok() {
        return Err(SocketError::AlreadyBound {
            path: path.to_path_buf(),
        });
    }

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        if !dir.exists() {
            DirBuilder::new()
                .recursive(true)
                .mode(DIRECTORY_MODE)
                .create(dir)
                .map_err(|source| SocketError::CreateDir {
                    path: dir.to_path_buf(),
                    source,
                })?;
            debug!(dir = %dir.display(), "created socket directory");
        }
    }

    let listener = with_umask(BIND_UMASK, || UnixListener::bind(path)).map_err(|source| {
        SocketError::Bind {
            path: path.to_path_buf(),
            source,
        }
    })?;

    if let Err(source) = fs::set_permissions(path, Permissions::from_mode(SOCKET_MODE)) {
        drop(listener);
        if let Err(err) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %err, "failed to remove insecure socket");
        }
        return Err(SocketError::Permissions {
            path: path.to_path_buf(),
            source,
        });
    }

    Ok(BoundSocket {
        listener,
        path: path.to_path_buf(),
    })
}

/// Removes the socket file. Safe to call more than once.
pub fn teardown(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "removed socket"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "socket already removed");
        }
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove socket"),
    }
}

fn with_umask<T>(mask: u32, f: impl FnOnce() -> T) -> T {
    // SAFETY: umask has no memory-safety preconditions. The previous mask is
    // restored immediately after `f` returns.
    let previous = unsafe { libc::umask(mask as libc::mode_t) };
    let out = f();
    unsafe { libc::umask(previous) };
    out
}
