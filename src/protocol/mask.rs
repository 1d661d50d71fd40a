//! Client frame masking (RFC 6455 Section 5.3).

use crate::transport::TransportError;

/// XOR `data` with the repeating 4-byte `mask`.
///
/// Masking and unmasking are the same operation.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);
    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let val = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        chunk.copy_from_slice(&(val ^ mask_u32).to_ne_bytes());
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i];
    }
}

/// A fresh random masking key.
///
/// # Errors
///
/// Returns an error if the system random source is unavailable.
pub fn generate_mask() -> Result<[u8; 4], TransportError> {
    let mut mask = [0u8; 4];
    getrandom::getrandom(&mut mask)
        .map_err(|e| TransportError::Io(format!("random source unavailable: {e}")))?;
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn apply_mask_bytewise(data: &mut [u8], mask: [u8; 4]) {
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    #[test]
    fn test_rfc_example() {
        // RFC 6455 Section 5.7: masked "Hello".
        let mut data = [0x7f, 0x9f, 0x4d, 0x51, 0x58];
        apply_mask(&mut data, [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(&data, b"Hello");
    }

    #[test]
    fn test_empty() {
        let mut data: [u8; 0] = [];
        apply_mask(&mut data, [1, 2, 3, 4]);
    }

    #[test]
    fn test_generate_mask() {
        // Two zero masks in a row are astronomically unlikely.
        let a = generate_mask().unwrap();
        let b = generate_mask().unwrap();
        assert!(a != [0; 4] || b != [0; 4]);
    }

    proptest! {
        #[test]
        fn matches_bytewise(data in prop::collection::vec(any::<u8>(), 0..256), mask in any::<[u8; 4]>()) {
            let mut fast = data.clone();
            let mut slow = data;
            apply_mask(&mut fast, mask);
            apply_mask_bytewise(&mut slow, mask);
            prop_assert_eq!(fast, slow);
        }
    }
}
