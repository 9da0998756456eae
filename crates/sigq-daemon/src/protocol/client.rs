//! Secondary-side request forwarding.
//!
//! A secondary invocation encodes its validated configuration tuple and
//! file list onto the connected stream and exits; closing the connection
//! is the end-of-request marker. Relative paths are made absolute before
//! transmission because the primary resolves them against its own working
//! directory, not the secondary's.

use std::io;
use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tracing::debug;

use super::wire;

/// One signing request, ready to forward to the primary instance.
#[derive(Debug, Clone)]
pub struct SignRequest {
    /// Certificate identifier, if configured.
    pub cert_id: Option<String>,
    /// Smart-card name, if configured.
    pub card_name: Option<String>,
    /// Card-reader name, if configured.
    pub card_reader: Option<String>,
    /// Command template for the signing application.
    pub template: String,
    /// Files to sign, in order.
    pub files: Vec<PathBuf>,
}

/// Encodes and sends `request`, then flushes. Dropping the stream
/// afterwards closes the connection and completes the request.
///
/// # Errors
///
/// Returns the underlying I/O error; the caller treats it as a failed
/// hand-off.
pub async fn send_request(stream: &mut UnixStream, request: &SignRequest) -> io::Result<()> {
    let mut buf = Vec::new();
    wire::encode_field(request.cert_id.as_deref().unwrap_or(""), &mut buf);
    wire::encode_field(request.card_name.as_deref().unwrap_or(""), &mut buf);
    wire::encode_field(request.card_reader.as_deref().unwrap_or(""), &mut buf);
    wire::encode_field(&request.template, &mut buf);
    for file in &request.files {
        let absolute = std::path::absolute(file)?;
        wire::encode_field(&absolute.to_string_lossy(), &mut buf);
    }
    stream.write_all(&buf).await?;
    stream.flush().await?;
    debug!(files = request.files.len(), "signing request forwarded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::session::{IpcSession, SessionRead};
    use super::*;

    #[tokio::test]
    async fn test_request_round_trips_through_a_session() {
        let (mut client, server) = UnixStream::pair().unwrap();
        let mut session = IpcSession::new(server);

        let request = SignRequest {
            cert_id: Some("CID1".to_owned()),
            card_name: Some("CARD1".to_owned()),
            card_reader: None,
            template: "sign %1 %2".to_owned(),
            files: vec![PathBuf::from("/tmp/a.bin")],
        };
        let writer = tokio::spawn(async move {
            send_request(&mut client, &request).await.unwrap();
        });

        let mut requests = Vec::new();
        loop {
            match session.read().await.unwrap() {
                SessionRead::Requests(mut r) => requests.append(&mut r),
                SessionRead::Closed => break,
            }
        }
        writer.await.unwrap();

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].identity.cert_id(), Some("CID1"));
        assert_eq!(requests[0].identity.card_reader(), None);
        assert_eq!(requests[0].path, PathBuf::from("/tmp/a.bin"));
    }

    #[tokio::test]
    async fn test_relative_paths_are_absolutized_before_sending() {
        let (mut client, server) = UnixStream::pair().unwrap();
        let mut session = IpcSession::new(server);

        let request = SignRequest {
            cert_id: None,
            card_name: None,
            card_reader: None,
            template: "run %1".to_owned(),
            files: vec![PathBuf::from("relative/a.bin")],
        };
        let writer = tokio::spawn(async move {
            send_request(&mut client, &request).await.unwrap();
        });

        let mut requests = Vec::new();
        loop {
            match session.read().await.unwrap() {
                SessionRead::Requests(mut r) => requests.append(&mut r),
                SessionRead::Closed => break,
            }
        }
        writer.await.unwrap();
        assert!(requests[0].path.is_absolute());
        assert!(requests[0].path.ends_with("relative/a.bin"));
    }
}
