//! Command-template expansion.
//!
//! The template is scanned once: `%1` expands to the file path, `%2` to
//! the PIN, `%%` to a literal percent sign. Unrecognized `%x` sequences
//! (and a trailing lone `%`) pass through literally. Because the result
//! may embed the PIN, it lives in a [`Zeroizing`] buffer that is wiped
//! when dropped.

use zeroize::Zeroizing;

/// A fully expanded command line.
#[derive(Debug)]
pub struct ExpandedCommand {
    /// The command line with all placeholders substituted. May contain
    /// the PIN, hence the zeroizing wrapper.
    pub command_line: Zeroizing<String>,
    /// `true` if `%2` never occurred: the PIN must then be delivered on
    /// the child's standard input instead.
    pub pin_on_stdin: bool,
}

/// Expands `template` with the given file path and PIN.
#[must_use]
pub fn expand(template: &str, path: &str, pin: &str) -> ExpandedCommand {
    let mut out = Zeroizing::new(String::with_capacity(template.len() + path.len()));
    let mut has_pin_arg = false;
    let mut escaped = false;
    for ch in template.chars() {
        if escaped {
            escaped = false;
            match ch {
                '1' => out.push_str(path),
                '2' => {
                    out.push_str(pin);
                    has_pin_arg = true;
                }
                '%' => out.push('%'),
                other => {
                    // Unknown escape: keep both characters.
                    out.push('%');
                    out.push(other);
                }
            }
        } else if ch == '%' {
            escaped = true;
        } else {
            out.push(ch);
        }
    }
    if escaped {
        out.push('%');
    }
    ExpandedCommand {
        command_line: out,
        pin_on_stdin: !has_pin_arg,
    }
}
