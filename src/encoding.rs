//! Text encoding helpers.
//!
//! Text crosses the wire as UTF-8. A NUL byte is treated as a terminator
//! marker: text containing one is rejected in both directions, so that
//! `bytes_to_text(text_to_bytes(s))` recovers `s` for every accepted input.

use bytes::Bytes;

use crate::error::{Error, Result};

/// Encode `text` as UTF-8 wire bytes.
///
/// # Errors
///
/// Returns [`Error::InvalidTextEncoding`] if `text` contains a NUL character.
pub fn text_to_bytes(text: &str) -> Result<Bytes> {
    if text.as_bytes().contains(&0) {
        return Err(Error::InvalidTextEncoding);
    }
    Ok(Bytes::copy_from_slice(text.as_bytes()))
}

/// Decode the first `length` bytes of `bytes` as UTF-8 text.
///
/// # Errors
///
/// Returns [`Error::InvalidTextEncoding`] if `length` exceeds the buffer,
/// the declared range contains a NUL byte, or the range is not valid UTF-8.
pub fn bytes_to_text(bytes: &[u8], length: usize) -> Result<String> {
    let declared = bytes.get(..length).ok_or(Error::InvalidTextEncoding)?;
    if declared.contains(&0) {
        return Err(Error::InvalidTextEncoding);
    }
    Ok(std::str::from_utf8(declared)?.to_owned())
}

/// Encode UTF-16 code units as UTF-8 wire bytes.
///
/// # Errors
///
/// Returns [`Error::InvalidTextEncoding`] on an unpaired surrogate or a NUL unit.
pub fn utf16_to_bytes(units: &[u16]) -> Result<Bytes> {
    let text = String::from_utf16(units).map_err(|_| Error::InvalidTextEncoding)?;
    text_to_bytes(&text)
}

/// Raw little-endian bytes of UTF-16 code units, for sending wide text as binary.
#[must_use]
pub fn utf16_le_bytes(units: &[u16]) -> Bytes {
    let mut out = Vec::with_capacity(units.len() * 2);
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_ascii() {
        let bytes = text_to_bytes("Hello world!").unwrap();
        assert_eq!(bytes_to_text(&bytes, bytes.len()).unwrap(), "Hello world!");
    }

    #[test]
    fn test_roundtrip_empty() {
        let bytes = text_to_bytes("").unwrap();
        assert!(bytes.is_empty());
        assert_eq!(bytes_to_text(&bytes, 0).unwrap(), "");
    }

    #[test]
    fn test_roundtrip_multibyte() {
        let text = "héllo, мир, 世界, 🦀";
        let bytes = text_to_bytes(text).unwrap();
        assert_eq!(bytes_to_text(&bytes, bytes.len()).unwrap(), text);
    }

    #[test]
    fn test_embedded_nul_rejected() {
        assert_eq!(text_to_bytes("a\0b"), Err(Error::InvalidTextEncoding));
        assert_eq!(bytes_to_text(b"a\0b", 3), Err(Error::InvalidTextEncoding));
    }

    #[test]
    fn test_declared_length_bounds_the_check() {
        // NUL past the declared length is not part of the text.
        assert_eq!(bytes_to_text(b"ab\0", 2).unwrap(), "ab");
        assert_eq!(bytes_to_text(b"ab", 3), Err(Error::InvalidTextEncoding));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        assert_eq!(
            bytes_to_text(&[0xc3, 0x28], 2),
            Err(Error::InvalidTextEncoding)
        );
        // Truncated multi-byte sequence.
        let bytes = "é".as_bytes();
        assert_eq!(bytes_to_text(bytes, 1), Err(Error::InvalidTextEncoding));
    }

    #[test]
    fn test_utf16_to_bytes() {
        let units: Vec<u16> = "Hello world!".encode_utf16().collect();
        assert_eq!(&utf16_to_bytes(&units).unwrap()[..], b"Hello world!");
    }

    #[test]
    fn test_utf16_unpaired_surrogate_rejected() {
        assert_eq!(
            utf16_to_bytes(&[0x0048, 0xd800]),
            Err(Error::InvalidTextEncoding)
        );
    }

    #[test]
    fn test_utf16_le_bytes() {
        assert_eq!(&utf16_le_bytes(&[0x0041, 0x20ac])[..], &[0x41, 0x00, 0xac, 0x20]);
    }
}
