//! IPC transport and request protocol.
//!
//! A fixed, versioned Unix socket elects one primary instance per user;
//! secondaries connect to it, stream their request and exit. The wire
//! format is a flat sequence of null-terminated UTF-16LE fields: the four
//! configuration fields first, then one field per file, ended by closing
//! the connection.
//!
//! # Module Overview
//!
//! - [`error`]: transport error types ([`TransportError`])
//! - [`socket`]: well-known channel path, primary/secondary election and
//!   the peer-executable anti-spoofing check
//! - [`wire`]: UTF-16LE field encoding and terminator scanning
//! - [`session`]: per-connection read state machine ([`IpcSession`])
//! - [`client`]: secondary-side request writer ([`send_request`])

pub mod client;
pub mod error;
pub mod session;
pub mod socket;
pub mod wire;

pub use client::{SignRequest, send_request};
pub use error::{TransportError, TransportResult};
pub use session::{IpcSession, JobRequest, SessionRead};
pub use socket::{PrimaryListener, Role, bind_or_connect, default_socket_path};
