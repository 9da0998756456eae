//! Process-bound at-rest encryption for cached PINs.

use chacha20poly1305::aead::{Aead, AeadCore, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use zeroize::Zeroizing;

use super::{PinError, PinProtector};

/// ChaCha20-Poly1305 size of the nonce prefixed to every blob.
const NONCE_LEN: usize = 12;

/// [`PinProtector`] keyed by a random per-process key.
///
/// The key is generated at construction and never leaves the process, so
/// blobs are decryptable only within the process (and lifetime) that
/// protected them. Blob layout: nonce followed by ciphertext.
pub struct ProcessKeyProtector {
    cipher: ChaCha20Poly1305,
}

impl ProcessKeyProtector {
    /// Creates a protector with a fresh random key.
    #[must_use]
    pub fn new() -> Self {
        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        Self {
            cipher: ChaCha20Poly1305::new(&key),
        }
    }
}

impl Default for ProcessKeyProtector {
    fn default() -> Self {
        Self::new()
    }
}

impl PinProtector for ProcessKeyProtector {
    fn protect(&self, raw: &[u8]) -> Result<Vec<u8>, PinError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self.cipher.encrypt(&nonce, raw).map_err(|_| PinError::Protect {
            reason: "encryption failed".to_owned(),
        })?;
        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn unprotect(&self, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, PinError> {
        if blob.len() < NONCE_LEN {
            return Err(PinError::Protect {
                reason: "blob is too short".to_owned(),
            });
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let raw = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| PinError::Protect {
                reason: "decryption failed".to_owned(),
            })?;
        Ok(Zeroizing::new(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let protector = ProcessKeyProtector::new();
        let blob = protector.protect(b"123456").unwrap();
        assert_ne!(&blob[NONCE_LEN..], b"123456");
        let raw = protector.unprotect(&blob).unwrap();
        assert_eq!(&**raw, b"123456");
    }

    #[test]
    fn test_blob_is_bound_to_the_protector_instance() {
        let blob = ProcessKeyProtector::new().protect(b"123456").unwrap();
        // A different key (a different process context) cannot decrypt it.
        let other = ProcessKeyProtector::new();
        assert!(matches!(
            other.unprotect(&blob),
            Err(PinError::Protect { .. })
        ));
    }

    #[test]
    fn test_tampered_blob_is_rejected() {
        let protector = ProcessKeyProtector::new();
        let mut blob = protector.protect(b"123456").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(
            protector.unprotect(&blob),
            Err(PinError::Protect { .. })
        ));
    }

    #[test]
    fn test_truncated_blob_is_rejected() {
        let protector = ProcessKeyProtector::new();
        assert!(matches!(
            protector.unprotect(&[0u8; 4]),
            Err(PinError::Protect { .. })
        ));
    }
}
