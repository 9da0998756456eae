//! Captured child-process output.
//!
//! [`OutputBuffer`] accumulates the merged stdout/stderr stream of one
//! signing job. Bytes are fed through the incremental [`Utf8Decoder`];
//! malformed sequences and out-of-range scalars become the replacement
//! character, a bare `\n` not preceded by `\r` gets a `\r` injected, and
//! NUL scalars are counted but not stored. A running code-point counter
//! enforces the capture ceiling: reaching it appends a one-time truncation
//! notice and discards everything after, while the child runs on.

mod utf8;

pub use utf8::{Utf8Decoder, Utf8Step};

/// Default capture ceiling in code points.
pub const DEFAULT_OUTPUT_LIMIT: usize = 1024 * 1024;

/// Horizontal rule used by the appended notices.
const NOTICE_RULE: &str =
    "--------------------------------------------------------------------------------";

/// Accumulated, normalized output of one signing job.
#[derive(Debug)]
pub struct OutputBuffer {
    text: String,
    decoder: Utf8Decoder,
    /// Scalars consumed so far, including skipped NULs.
    code_points: usize,
    limit: usize,
    /// Previous scalar, for `\r\n` normalization.
    last: u32,
    truncated: bool,
}

impl OutputBuffer {
    /// Creates an empty buffer with the given code-point ceiling.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            decoder: Utf8Decoder::new(),
            code_points: 0,
            limit,
            last: 0,
            truncated: false,
        }
    }

    /// Feeds a chunk of raw child output.
    ///
    /// Bytes beyond the ceiling are discarded; the decoder state is not
    /// advanced for them, mirroring a reader that simply stops consuming.
    pub fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if self.code_points >= self.limit {
                break;
            }
            let cp = match self.decoder.push(byte) {
                Utf8Step::NeedMore => continue,
                Utf8Step::Scalar(cp) if cp <= 0x0010_FFFF => cp,
                // Malformed sequence or value above U+10FFFF.
                Utf8Step::Scalar(_) | Utf8Step::Invalid => {
                    u32::from(char::REPLACEMENT_CHARACTER)
                }
            };
            if cp == u32::from('\n') && self.last != u32::from('\r') {
                self.text.push('\r');
            }
            if cp != 0 {
                // Surrogate scalars cannot be stored; keep the accounting.
                self.text
                    .push(char::from_u32(cp).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            self.last = cp;
            self.code_points += 1;
        }
        if self.code_points >= self.limit && !self.truncated {
            self.truncated = true;
            self.text.push_str("\r\n");
            self.text.push_str(NOTICE_RULE);
            self.text.push_str("\r\nThe output has been truncated here.");
        }
    }

    /// Appends the failure banner for a nonzero exit code.
    pub fn append_exit_failure(&mut self, code: i32) {
        self.append_notice(&format!("Command failed with exit code {code}."));
    }

    /// Appends the failure banner for a signal-terminated child.
    pub fn append_signal_failure(&mut self, signal: Option<i32>) {
        match signal {
            Some(signal) => {
                self.append_notice(&format!("Command terminated by signal {signal}."));
            }
            None => self.append_notice("Command terminated abnormally."),
        }
    }

    fn append_notice(&mut self, notice: &str) {
        self.text.push_str("\r\n");
        self.text.push_str(NOTICE_RULE);
        self.text.push_str("\r\n");
        self.text.push_str(notice);
    }

    /// The captured text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Scalars consumed so far.
    #[must_use]
    pub fn code_points(&self) -> usize {
        self.code_points
    }

    /// Returns `true` once the ceiling has been reached.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}
