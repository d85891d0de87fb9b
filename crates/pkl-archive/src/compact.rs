//! Unsigned compact index codec.
//!
//! Seven data bits per byte, least significant group first; the high bit
//! marks a continuation. Values below 128 take a single byte.

use crate::archive::ArchiveReader;

/// Longest valid encoding of a `u64`.
pub const MAX_COMPACT_LEN: usize = 10;

/// Append the encoding of `value` to `buf`.
pub fn encode_u64(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Number of bytes `value` encodes to.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Decode from a byte slice. Returns `(value, bytes_consumed)`, or `None`
/// on a truncated or overlong encoding.
pub fn decode_u64(data: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, &byte) in data.iter().take(MAX_COMPACT_LEN).enumerate() {
        let group = (byte & 0x7F) as u64;
        let shift = 7 * i as u32;
        if shift == 63 && group > 1 {
            return None;
        }
        value |= group << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Decode from an archive. `None` on a truncated or overlong encoding.
pub(crate) fn read_u64<R: ArchiveReader + ?Sized>(reader: &mut R) -> Option<u64> {
    let mut value: u64 = 0;
    for i in 0..MAX_COMPACT_LEN {
        let byte = reader.read_u8();
        if reader.is_error() {
            return None;
        }
        let group = (byte & 0x7F) as u64;
        let shift = 7 * i as u32;
        if shift == 63 && group > 1 {
            return None;
        }
        value |= group << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Archive, ArchiveWriter};
    use crate::memory::{MemoryReader, MemoryWriter};
    use proptest::prelude::*;

    #[test]
    fn small_values_take_one_byte() {
        let mut buf = Vec::new();
        encode_u64(&mut buf, 0);
        encode_u64(&mut buf, 127);
        assert_eq!(buf, vec![0x00, 0x7F]);
    }

    #[test]
    fn multi_byte_layout() {
        let mut buf = Vec::new();
        encode_u64(&mut buf, 300);
        assert_eq!(buf, vec![0xAC, 0x02]);
        assert_eq!(decode_u64(&buf), Some((300, 2)));
    }

    #[test]
    fn max_value_uses_ten_bytes() {
        let mut buf = Vec::new();
        encode_u64(&mut buf, u64::MAX);
        assert_eq!(buf.len(), MAX_COMPACT_LEN);
        assert_eq!(decode_u64(&buf), Some((u64::MAX, MAX_COMPACT_LEN)));
    }

    #[test]
    fn truncated_encoding_fails() {
        assert_eq!(decode_u64(&[0x80]), None);
        assert_eq!(decode_u64(&[]), None);
    }

    #[test]
    fn overlong_encoding_fails() {
        let overflow = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x02];
        assert_eq!(decode_u64(&overflow), None);
        let eleven = [0x80; 11];
        assert_eq!(decode_u64(&eleven), None);
    }

    #[test]
    fn archive_read_sets_error_on_truncation() {
        let mut r = MemoryReader::new(vec![0x80, 0x80]);
        assert_eq!(r.read_compact_u64(), 0);
        assert!(r.is_error());
    }

    #[test]
    fn compact_u32_rejects_wide_values() {
        let mut w = MemoryWriter::new();
        w.write_compact_u64(u32::MAX as u64 + 1);
        let mut r = MemoryReader::new(w.into_bytes());
        assert_eq!(r.read_compact_u32(), 0);
        assert!(r.is_error());
    }

    proptest! {
        #[test]
        fn encoded_len_matches_encoding(value in any::<u64>()) {
            let mut buf = Vec::new();
            encode_u64(&mut buf, value);
            prop_assert_eq!(buf.len(), encoded_len(value));
        }

        #[test]
        fn archive_codec_agrees_with_slice_codec(value in any::<u64>()) {
            let mut w = MemoryWriter::new();
            w.write_compact_u64(value);
            let bytes = w.into_bytes();
            prop_assert_eq!(decode_u64(&bytes), Some((value, bytes.len())));
            let mut r = MemoryReader::new(bytes);
            prop_assert_eq!(r.read_compact_u64(), value);
            prop_assert!(!r.is_error());
        }
    }
}
