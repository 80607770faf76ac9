//! UTF-16LE string codecs.
//!
//! Strings cross the channel as UTF-16LE byte runs with the length carried
//! by the reference, no terminating NUL. Service dependency lists and
//! required-privilege lists use the multi-string form: each entry followed
//! by a NUL code unit, the whole list terminated by one more.

use crate::WireError;

/// Encodes a string as UTF-16LE bytes, no terminator.
pub fn encode(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() * 2);
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Decodes UTF-16LE bytes produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<String, WireError> {
    if bytes.len() % 2 != 0 {
        return Err(WireError::InvalidString);
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| WireError::InvalidString)
}

/// Encodes a NUL-separated, double-NUL-terminated UTF-16LE multi-string.
pub fn encode_multi<S: AsRef<str>>(parts: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(&encode(part.as_ref()));
        out.extend_from_slice(&0u16.to_le_bytes());
    }
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// Decodes a multi-string back into its parts.
pub fn decode_multi(bytes: &[u8]) -> Result<Vec<String>, WireError> {
    if bytes.len() % 2 != 0 {
        return Err(WireError::InvalidString);
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    let mut parts = Vec::new();
    let mut start = 0usize;
    for (i, unit) in units.iter().enumerate() {
        if *unit == 0 {
            if i == start {
                // Empty entry is the list terminator.
                return Ok(parts);
            }
            parts.push(
                String::from_utf16(&units[start..i]).map_err(|_| WireError::InvalidString)?,
            );
            start = i + 1;
        }
    }

    Err(WireError::InvalidString)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_basic_and_non_ascii() {
        for s in ["", "notepad.exe", "Домен\\пользователь", "emoji 🦀"] {
            assert_eq!(decode(&encode(s)).unwrap(), s);
        }
    }

    #[test]
    fn multi_string_round_trips() {
        let deps = ["RpcSs".to_string(), "Tcpip".to_string()];
        let bytes = encode_multi(&deps);
        // Two separators plus the terminator.
        assert_eq!(bytes.len(), ("RpcSs".len() + "Tcpip".len() + 3) * 2);
        assert_eq!(decode_multi(&bytes).unwrap(), deps);
    }

    #[test]
    fn empty_multi_string_is_a_lone_terminator() {
        let bytes = encode_multi::<&str>(&[]);
        assert_eq!(bytes, vec![0, 0]);
        assert_eq!(decode_multi(&bytes).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn unterminated_multi_string_is_rejected() {
        let mut bytes = encode("Tcpip");
        bytes.extend_from_slice(&0u16.to_le_bytes());
        assert!(decode_multi(&bytes).is_err());
    }
}
