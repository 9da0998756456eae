//! Scripted prompt and validator implementations.
//!
//! Used by the test suites of this crate and of the daemon; they answer
//! from a fixed script and count how often they were consulted, so tests
//! can assert that a cached identity is not prompted for twice.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use secrecy::SecretString;

use super::{PinError, PinPrompt, TokenValidator};
use crate::identity::CertIdentity;

/// [`PinPrompt`] answering from a fixed list of responses.
///
/// `None` entries script a cancelled prompt. Running out of responses
/// also counts as cancellation.
pub struct ScriptedPrompt {
    responses: VecDeque<Option<SecretString>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedPrompt {
    /// Creates a prompt that plays back `responses` in order.
    #[must_use]
    pub fn new<'a, I: IntoIterator<Item = Option<&'a str>>>(responses: I) -> Self {
        Self {
            responses: responses
                .into_iter()
                .map(|r| r.map(|pin| SecretString::from(pin.to_owned())))
                .collect(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared call counter, readable after the prompt has been handed off.
    #[must_use]
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl PinPrompt for ScriptedPrompt {
    fn prompt(&mut self, _identity: &CertIdentity) -> Result<Option<SecretString>, PinError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.responses.pop_front().flatten())
    }
}

/// [`TokenValidator`] with a fixed verdict.
pub struct ScriptedValidator {
    accept: bool,
    calls: Arc<AtomicUsize>,
}

impl ScriptedValidator {
    /// Creates a validator that accepts every PIN.
    #[must_use]
    pub fn accepting() -> Self {
        Self {
            accept: true,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates a validator that rejects every PIN.
    #[must_use]
    pub fn rejecting() -> Self {
        Self {
            accept: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared call counter.
    #[must_use]
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl TokenValidator for ScriptedValidator {
    fn validate(
        &mut self,
        _identity: &CertIdentity,
        _pin: &SecretString,
    ) -> Result<bool, PinError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.accept)
    }
}
