//! Credential cache and its collaborator ports.
//!
//! The cache maps a [`CertIdentity`] to an encrypted PIN blob. Entries are
//! populated lazily: the first job for an identity prompts the user,
//! validates the PIN against the token and protects it at rest; later jobs
//! decrypt the stored blob at the moment of use. A failed prompt or
//! validation leaves the entry empty so the next job re-prompts.
//!
//! Prompting, validation and at-rest protection are ports implemented by
//! the embedding binary ([`PinPrompt`], [`TokenValidator`],
//! [`PinProtector`]). [`ProcessKeyProtector`] is the default protector;
//! [`doubles`] ships scripted prompt/validator implementations for tests.
//!
//! Decrypted PIN material only ever lives in [`Zeroizing`] buffers, so it
//! is wiped on every exit path, including early returns.

mod protect;

pub mod doubles;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

pub use protect::ProcessKeyProtector;

use crate::containers::{ChainMap, KeyOps};
use crate::identity::CertIdentity;

/// Credential failure, classified by stage.
#[derive(Debug, Error)]
pub enum PinError {
    /// The user dismissed the prompt without entering a PIN.
    #[error("no PIN was provided for {identity}")]
    Missing {
        /// Display name of the identity that was prompted for.
        identity: String,
    },

    /// The token rejected the entered PIN.
    #[error("the token rejected the PIN for {identity}")]
    Rejected {
        /// Display name of the identity the PIN was validated against.
        identity: String,
    },

    /// The prompt collaborator itself failed.
    #[error("credential prompt failed: {reason}")]
    Prompt {
        /// Description of the prompt failure.
        reason: String,
    },

    /// Protecting or unprotecting the stored blob failed.
    #[error("credential protection failed: {reason}")]
    Protect {
        /// Description of the protection failure.
        reason: String,
    },
}

impl PinError {
    /// Returns `true` if the failure means no PIN was obtained at all, as
    /// opposed to a PIN that was obtained but not accepted.
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing { .. } | Self::Prompt { .. })
    }
}

/// Asks the user for the PIN of an identity.
pub trait PinPrompt {
    /// Prompts for a PIN. `Ok(None)` means the user cancelled.
    fn prompt(&mut self, identity: &CertIdentity) -> Result<Option<SecretString>, PinError>;
}

/// Checks an entered PIN against the identity's token.
pub trait TokenValidator {
    /// Returns `Ok(true)` if the token accepts the PIN.
    fn validate(&mut self, identity: &CertIdentity, pin: &SecretString)
    -> Result<bool, PinError>;
}

/// Encrypts PIN material at rest, bound to the current process context.
pub trait PinProtector {
    /// Protects raw PIN bytes into an opaque blob.
    fn protect(&self, raw: &[u8]) -> Result<Vec<u8>, PinError>;

    /// Recovers the raw PIN bytes from a blob produced by
    /// [`protect`](PinProtector::protect).
    fn unprotect(&self, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, PinError>;
}

/// Value-based key handling for identities: equal triples hit the same
/// entry no matter how they were constructed, and cloning is a
/// reference-count acquire.
struct IdentityOps;

impl KeyOps<CertIdentity> for IdentityOps {
    fn clone_key(&self, key: &CertIdentity) -> CertIdentity {
        key.clone()
    }

    fn eq(&self, lhs: &CertIdentity, rhs: &CertIdentity) -> bool {
        lhs == rhs
    }

    fn hash(&self, key: &CertIdentity) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }
}

/// One cache slot: empty until a PIN was validated and protected.
#[derive(Debug, Default)]
struct PinEntry {
    blob: Option<Vec<u8>>,
}

/// Identity-keyed cache of encrypted PINs.
pub struct PinCache<P: PinProtector> {
    entries: ChainMap<CertIdentity, PinEntry, IdentityOps>,
    protector: P,
}

impl<P: PinProtector> PinCache<P> {
    /// Creates an empty cache using `protector` for at-rest encryption.
    #[must_use]
    pub fn new(protector: P) -> Self {
        Self {
            entries: ChainMap::new(IdentityOps),
            protector,
        }
    }

    /// Returns the decrypted PIN for `identity`, prompting and validating
    /// on first use.
    ///
    /// # Errors
    ///
    /// [`PinError::Missing`] or [`PinError::Prompt`] when no PIN was
    /// obtained, [`PinError::Rejected`] or [`PinError::Protect`] when one
    /// was obtained but not accepted or not protectable. In every failure
    /// case the entry stays empty, so the next fetch prompts again.
    pub fn fetch(
        &mut self,
        identity: &CertIdentity,
        prompt: &mut dyn PinPrompt,
        validator: &mut dyn TokenValidator,
    ) -> Result<Zeroizing<String>, PinError> {
        let entry = self.entries.entry(identity);
        if entry.blob.is_none() {
            let Some(pin) = prompt.prompt(identity)? else {
                return Err(PinError::Missing {
                    identity: identity.display_name().to_owned(),
                });
            };
            if !validator.validate(identity, &pin)? {
                return Err(PinError::Rejected {
                    identity: identity.display_name().to_owned(),
                });
            }
            let blob = self.protector.protect(pin.expose_secret().as_bytes())?;
            entry.blob = Some(blob);
            debug!(identity = %identity, "cached protected PIN");
        } else {
            debug!(identity = %identity, "PIN cache hit");
        }
        let blob = entry.blob.as_deref().unwrap_or_default();
        let raw = self.protector.unprotect(blob)?;
        let text = std::str::from_utf8(&raw).map_err(|_| PinError::Protect {
            reason: "recovered PIN is not valid UTF-8".to_owned(),
        })?;
        Ok(Zeroizing::new(text.to_owned()))
    }

    /// Number of identities with a cache slot, populated or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no identity has a cache slot yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if `identity` has a populated (protected) entry.
    #[must_use]
    pub fn is_cached(&self, identity: &CertIdentity) -> bool {
        self.entries
            .get(identity)
            .is_some_and(|entry| entry.blob.is_some())
    }
}
