//! Transport error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Convenience result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Failures of the coordination channel.
///
/// Only the setup variants are fatal to the process; everything that can
/// happen after the channel exists is recovered by discarding the session
/// and resuming listening.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket directory could not be prepared.
    #[error("failed to prepare socket directory {path}: {source}")]
    Setup {
        /// Directory that was being prepared.
        path: PathBuf,
        /// Underlying I/O failure.
        source: io::Error,
    },

    /// Binding the well-known socket failed for a reason other than an
    /// existing primary instance.
    #[error("failed to bind socket {path}: {source}")]
    Bind {
        /// Socket path that was being bound.
        path: PathBuf,
        /// Underlying I/O failure.
        source: io::Error,
    },

    /// No primary instance was reachable and the socket could not be
    /// taken over.
    #[error("no primary instance reachable at {path}: {source}")]
    Connect {
        /// Socket path that was being connected to.
        path: PathBuf,
        /// Underlying I/O failure.
        source: io::Error,
    },

    /// A session buffered a field longer than the protocol allows.
    #[error("field exceeds the {max}-byte session buffer")]
    FieldTooLong {
        /// Session buffer capacity in bytes.
        max: usize,
    },

    /// Connection-level I/O failure; the session is discarded.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
