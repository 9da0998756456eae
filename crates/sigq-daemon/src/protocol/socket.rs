//! Well-known channel, single-instance election and peer verification.
//!
//! The coordination channel is a Unix socket under the user's runtime
//! directory. Whoever binds it first is the primary instance; every later
//! invocation connects to it as a secondary and forwards its request. The
//! socket file name carries a protocol version tag that changes whenever
//! the wire format changes, so incompatible builds never talk to each
//! other.
//!
//! # Security Considerations
//!
//! - The socket directory is created with mode 0700 and the socket file is
//!   set to mode 0600 after binding.
//! - Before any bytes of an accepted connection are read, the peer's
//!   executable path (via `SO_PEERCRED` and `/proc/<pid>/exe`) must equal
//!   our own; mismatching connections are dropped and listening resumes.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use super::error::{TransportError, TransportResult};

/// Subdirectory under the runtime directory.
const SOCKET_SUBDIR: &str = "sigq";

/// Socket file name. The embedded tag is the wire-format version: bump it
/// whenever the field sequence changes.
const SOCKET_NAME: &str = "sigq-b6f0a1d8-4e02-4c57-9b3a-52c86f6e0c11.sock";

/// Socket file permissions (owner read/write only).
const SOCKET_MODE: u32 = 0o600;

/// Directory permissions (owner only).
const DIRECTORY_MODE: u32 = 0o700;

/// Election attempts before giving up.
const ELECTION_ATTEMPTS: usize = 3;

/// Pause between election attempts.
const ELECTION_RETRY_DELAY: Duration = Duration::from_millis(100);

/// The well-known socket path for this user.
///
/// Priority:
/// 1. `$XDG_RUNTIME_DIR/sigq/<name>` if `XDG_RUNTIME_DIR` is set
/// 2. `/tmp/sigq/<name>` as fallback
#[must_use]
pub fn default_socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR").map_or_else(
        |_| PathBuf::from("/tmp").join(SOCKET_SUBDIR).join(SOCKET_NAME),
        |runtime_dir| PathBuf::from(runtime_dir).join(SOCKET_SUBDIR).join(SOCKET_NAME),
    )
}

/// Which side of the coordination channel this invocation ended up on.
pub enum Role {
    /// This process bound the socket and executes jobs.
    Primary(PrimaryListener),
    /// A primary already exists; the stream is connected to it.
    Secondary(UnixStream),
}

/// Attempts to become the primary instance, falling back to connecting as
/// a secondary.
///
/// A socket file whose listener is gone (connection refused) is removed
/// and the election retried, up to three attempts with a short pause, so a
/// crashed primary does not wedge the channel.
///
/// # Errors
///
/// Returns [`TransportError::Setup`], [`TransportError::Bind`] or
/// [`TransportError::Connect`]; all of them are startup-fatal.
pub async fn bind_or_connect(path: &Path) -> TransportResult<Role> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }
    let mut last_refused: Option<io::Error> = None;
    for attempt in 0..ELECTION_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(ELECTION_RETRY_DELAY).await;
        }
        match UnixListener::bind(path) {
            Ok(listener) => {
                set_socket_permissions(path)?;
                info!(socket = %path.display(), "elected as the primary instance");
                return Ok(Role::Primary(PrimaryListener {
                    listener,
                    path: path.to_path_buf(),
                }));
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => match UnixStream::connect(path).await
            {
                Ok(stream) => {
                    debug!(socket = %path.display(), "primary instance found, acting as secondary");
                    return Ok(Role::Secondary(stream));
                }
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    // Socket file left behind by a dead primary.
                    warn!(socket = %path.display(), "removing stale socket file");
                    let _ = std::fs::remove_file(path);
                    last_refused = Some(e);
                }
                Err(e) => {
                    return Err(TransportError::Connect {
                        path: path.to_path_buf(),
                        source: e,
                    });
                }
            },
            Err(e) => {
                return Err(TransportError::Bind {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        }
    }
    Err(TransportError::Connect {
        path: path.to_path_buf(),
        source: last_refused
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrInUse, "election failed")),
    })
}

/// Listening end of the coordination channel, held by the primary.
///
/// The socket file is removed again when the listener is dropped.
pub struct PrimaryListener {
    listener: UnixListener,
    path: PathBuf,
}

impl PrimaryListener {
    /// Accepts the next connection from a verified sibling process.
    ///
    /// Connections whose peer executable differs from our own are dropped
    /// without reading a single byte, and listening continues.
    ///
    /// # Errors
    ///
    /// Returns an error only if accepting itself fails.
    pub async fn accept(&self) -> TransportResult<UnixStream> {
        loop {
            let (stream, _addr) = self.listener.accept().await?;
            match verify_peer(&stream) {
                Ok(()) => {
                    debug!("accepted connection from sibling instance");
                    return Ok(stream);
                }
                Err(reason) => {
                    warn!(reason, "dropping connection from unverified peer");
                }
            }
        }
    }

    /// The bound socket path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PrimaryListener {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(socket = %self.path.display(), "failed to remove socket file: {e}");
            }
        }
    }
}

/// Checks that the connecting process runs the same executable image as
/// this one. Returns a log-worthy reason on mismatch.
fn verify_peer(stream: &UnixStream) -> Result<(), &'static str> {
    let cred = stream
        .peer_cred()
        .map_err(|_| "peer credentials unavailable")?;
    let Some(pid) = cred.pid() else {
        return Err("peer pid unavailable");
    };
    let peer_exe = std::fs::read_link(format!("/proc/{pid}/exe"))
        .map_err(|_| "peer executable unreadable")?;
    let own_exe = std::env::current_exe().map_err(|_| "own executable unreadable")?;
    if peer_exe == own_exe {
        Ok(())
    } else {
        Err("peer executable path differs")
    }
}

/// Creates the socket directory with owner-only permissions.
///
/// Permissions of a pre-existing directory are left alone; only
/// directories created here are forced to 0700.
fn ensure_directory(path: &Path) -> TransportResult<()> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(TransportError::Setup {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "not a directory"),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            std::fs::create_dir_all(path).map_err(|e| TransportError::Setup {
                path: path.to_path_buf(),
                source: e,
            })?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(DIRECTORY_MODE))
                    .map_err(|e| TransportError::Setup {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
            }
            Ok(())
        }
        Err(e) => Err(TransportError::Setup {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> TransportResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE)).map_err(|e| {
        TransportError::Bind {
            path: path.to_path_buf(),
            source: e,
        }
    })
}
