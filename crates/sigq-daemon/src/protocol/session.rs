//! Per-connection request parsing.
//!
//! One connection carries one request: four configuration fields followed
//! by any number of file fields, each null-terminated UTF-16LE, ended by
//! the peer closing its end. [`IpcSession`] accumulates raw bytes and
//! walks a five-position cursor over them; after the fourth field the
//! identity and template are committed, and every further field yields a
//! [`JobRequest`] for the dispatcher.
//!
//! A field that outgrows the session buffer is a protocol violation and
//! discards the session; so does any I/O failure. Neither is fatal to the
//! primary, which simply resumes listening.

use std::path::PathBuf;

use bytes::BytesMut;
use sigq_core::{CertIdentity, SignTemplate};
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;
use tracing::debug;

use super::error::{TransportError, TransportResult};
use super::wire;

/// Session buffer capacity. A single field must terminate within this
/// many bytes.
pub const SESSION_BUF_MAX: usize = 8192;

/// One file to sign, together with the request's committed configuration.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Shared identity of the signing credential.
    pub identity: CertIdentity,
    /// Shared command template.
    pub template: SignTemplate,
    /// File path as sent by the peer.
    pub path: PathBuf,
}

/// Field the session cursor is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldState {
    CertId,
    CardName,
    CardReader,
    Template,
    /// Loops on itself until the connection closes.
    File,
}

/// Result of one [`IpcSession::read`] call.
#[derive(Debug)]
pub enum SessionRead {
    /// File fields completed by this chunk, possibly none.
    Requests(Vec<JobRequest>),
    /// The peer closed the connection; the session is done.
    Closed,
}

/// Read state of one accepted connection.
pub struct IpcSession {
    stream: UnixStream,
    buf: BytesMut,
    state: FieldState,
    cert_id: Option<String>,
    card_name: Option<String>,
    card_reader: Option<String>,
    /// Set once the fourth field arrives.
    committed: Option<(CertIdentity, SignTemplate)>,
}

impl IpcSession {
    /// Wraps a freshly accepted connection.
    #[must_use]
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(SESSION_BUF_MAX),
            state: FieldState::CertId,
            cert_id: None,
            card_name: None,
            card_reader: None,
            committed: None,
        }
    }

    /// Reads one chunk and drains every completed field from the buffer.
    ///
    /// # Errors
    ///
    /// [`TransportError::FieldTooLong`] when the buffer fills without a
    /// terminator, [`TransportError::Io`] on read failure. Either way the
    /// caller discards the session.
    pub async fn read(&mut self) -> TransportResult<SessionRead> {
        let mut chunk = [0u8; SESSION_BUF_MAX];
        let space = SESSION_BUF_MAX - self.buf.len();
        let n = self.stream.read(&mut chunk[..space]).await?;
        if n == 0 {
            return Ok(SessionRead::Closed);
        }
        self.buf.extend_from_slice(&chunk[..n]);

        let mut requests = Vec::new();
        while let Some(units) = wire::find_terminator(&self.buf) {
            let field = self.take_field(units);
            if let Some(request) = self.advance(field) {
                requests.push(request);
            }
        }
        if self.buf.len() >= SESSION_BUF_MAX {
            return Err(TransportError::FieldTooLong {
                max: SESSION_BUF_MAX,
            });
        }
        Ok(SessionRead::Requests(requests))
    }

    /// Extracts the first `units` units as text and compacts the buffer.
    fn take_field(&mut self, units: usize) -> String {
        let bytes = self.buf.split_to((units + 1) * 2);
        wire::decode_units(&bytes, units)
    }

    /// Applies one completed field to the cursor.
    fn advance(&mut self, field: String) -> Option<JobRequest> {
        match self.state {
            FieldState::CertId => {
                self.cert_id = non_empty(field);
                self.state = FieldState::CardName;
                None
            }
            FieldState::CardName => {
                self.card_name = non_empty(field);
                self.state = FieldState::CardReader;
                None
            }
            FieldState::CardReader => {
                self.card_reader = non_empty(field);
                self.state = FieldState::Template;
                None
            }
            FieldState::Template => {
                let identity = CertIdentity::new(
                    self.cert_id.take(),
                    self.card_name.take(),
                    self.card_reader.take(),
                );
                let template = SignTemplate::new(&field);
                debug!(identity = %identity, template = %template, "request configuration committed");
                self.committed = Some((identity, template));
                self.state = FieldState::File;
                None
            }
            FieldState::File => {
                let (identity, template) = self.committed.as_ref()?;
                Some(JobRequest {
                    identity: identity.clone(),
                    template: template.clone(),
                    path: PathBuf::from(field),
                })
            }
        }
    }
}

fn non_empty(field: String) -> Option<String> {
    if field.is_empty() { None } else { Some(field) }
}
