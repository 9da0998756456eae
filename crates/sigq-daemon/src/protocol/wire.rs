//! Wire encoding helpers.
//!
//! The wire format is a flat sequence of null-terminated UTF-16LE text
//! fields with no other framing; the terminating unit doubles as the only
//! record separator.

/// Appends `text` as UTF-16LE units followed by the null terminator.
pub fn encode_field(text: &str, out: &mut Vec<u8>) {
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&[0, 0]);
}

/// Returns the unit index of the first null terminator within the
/// complete units of `buf`, if any. A trailing odd byte is ignored until
/// its partner arrives.
#[must_use]
pub fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.chunks_exact(2).position(|pair| pair == [0, 0])
}

/// Decodes the first `units` UTF-16LE units of `buf` into text.
///
/// Unpaired surrogates become the replacement character; the sender is
/// trusted only as far as the anti-spoofing check goes.
#[must_use]
pub fn decode_units(buf: &[u8], units: usize) -> String {
    let decoded: Vec<u16> = buf[..units * 2]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let mut buf = Vec::new();
        encode_field("sign %1 %2", &mut buf);
        let units = find_terminator(&buf).unwrap();
        assert_eq!(decode_units(&buf, units), "sign %1 %2");
        assert_eq!((units + 1) * 2, buf.len());
    }

    #[test]
    fn test_empty_field_is_just_the_terminator() {
        let mut buf = Vec::new();
        encode_field("", &mut buf);
        assert_eq!(buf, [0, 0]);
        assert_eq!(find_terminator(&buf), Some(0));
    }

    #[test]
    fn test_terminator_not_found_in_partial_field() {
        let mut buf = Vec::new();
        encode_field("abc", &mut buf);
        assert_eq!(find_terminator(&buf[..buf.len() - 2]), None);
        // An odd split right through a unit does not fake a terminator.
        assert_eq!(find_terminator(&buf[..buf.len() - 1]), None);
    }

    #[test]
    fn test_non_ascii_survives_the_wire() {
        let mut buf = Vec::new();
        encode_field("Grüße \u{1F511}", &mut buf);
        let units = find_terminator(&buf).unwrap();
        assert_eq!(decode_units(&buf, units), "Grüße \u{1F511}");
    }
}
