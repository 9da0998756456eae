//! Shared-ownership primitives: certificate identities and sign templates.
//!
//! Both types are immutable and reference-counted. Cloning acquires a
//! reference, dropping releases exactly once; the count is atomic because
//! a release may run from an asynchronous completion that interleaves with
//! the main flow.
//!
//! Equality, ordering and hashing are defined over the *values*, never
//! over allocation identity: two identities built independently from equal
//! triples behave as if interned to the same key, which is what the
//! credential cache relies on.

use std::fmt;
use std::sync::Arc;

/// The `{cert_id, card_name, card_reader}` triple naming a signing
/// credential.
///
/// Fields are optional; an absent field orders consistently against a
/// present one (`None` sorts first) rather than being merely "not equal".
/// Comparison is case-sensitive and exact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdentityFields {
    /// Certificate (key container) identifier.
    pub cert_id: Option<String>,
    /// Smart-card name.
    pub card_name: Option<String>,
    /// Card-reader name.
    pub card_reader: Option<String>,
}

/// Reference-counted certificate identity.
///
/// Created once per distinct triple and shared by every job and cache
/// entry that references it.
#[derive(Debug, Clone)]
pub struct CertIdentity {
    fields: Arc<IdentityFields>,
}

impl CertIdentity {
    /// Creates an identity from its triple.
    #[must_use]
    pub fn new(
        cert_id: Option<String>,
        card_name: Option<String>,
        card_reader: Option<String>,
    ) -> Self {
        Self {
            fields: Arc::new(IdentityFields {
                cert_id,
                card_name,
                card_reader,
            }),
        }
    }

    /// The full triple.
    #[must_use]
    pub fn fields(&self) -> &IdentityFields {
        &self.fields
    }

    /// Certificate identifier, if present.
    #[must_use]
    pub fn cert_id(&self) -> Option<&str> {
        self.fields.cert_id.as_deref()
    }

    /// Smart-card name, if present.
    #[must_use]
    pub fn card_name(&self) -> Option<&str> {
        self.fields.card_name.as_deref()
    }

    /// Card-reader name, if present.
    #[must_use]
    pub fn card_reader(&self) -> Option<&str> {
        self.fields.card_reader.as_deref()
    }

    /// Human-readable name for prompts and logs: the card name when
    /// known, otherwise the certificate id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.card_name()
            .or_else(|| self.cert_id())
            .unwrap_or("(unnamed identity)")
    }

    /// Current number of shared references.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.fields)
    }
}

impl PartialEq for CertIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for CertIdentity {}

impl PartialOrd for CertIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CertIdentity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.fields.cmp(&other.fields)
    }
}

impl std::hash::Hash for CertIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.fields.hash(state);
    }
}

impl fmt::Display for CertIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.cert_id().unwrap_or("-"),
            self.card_name().unwrap_or("-"),
            self.card_reader().unwrap_or("-")
        )
    }
}

/// Reference-counted command template for the external signing
/// application.
///
/// Immutable text containing `%1`/`%2`/`%%` placeholders; shared across
/// all jobs created from one configuration or one transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignTemplate {
    text: Arc<str>,
}

impl SignTemplate {
    /// Creates a template from its text.
    #[must_use]
    pub fn new(text: impl AsRef<str>) -> Self {
        Self {
            text: Arc::from(text.as_ref()),
        }
    }

    /// The template text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Current number of shared references.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.text)
    }
}

impl fmt::Display for SignTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
