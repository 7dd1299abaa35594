//! Wire format of packed streams (version 1)
//!
//! This layout is this crate's own, identified by [FORMAT_VERSION]. It is in
//! the spirit of the Ray/tSCc LZ77 packer the depacker was written for, but it
//! has not been checked against that encoder's output, so streams from it
//! are not assumed to decode here.
//!
//!
//! ```text
//! [0x00] original length   (u32 big endian)
//! [0x04] tag byte, then up to 8 tokens, then another tag byte, ...
//! ```
//!
//! Tag bits are consumed MSB first. A clear bit is a literal byte, a set bit
//! is a two byte match descriptor:
//!
//! ```text
//! b0: oooo llll   b1: oooo oooo
//! length = llll + 2
//! offset = oooo_oooooooo (12 bits, counted back from the output cursor)
//! ```
//!
//! A descriptor whose first byte is zero ends the stream, so the packer never
//! emits a length-2 match with an offset below 256.

/// Version of the layout described above
pub const FORMAT_VERSION: u32 = 1;

/// Bytes in front of the first tag
pub const HEADER_LEN: usize = 4;

/// First descriptor byte that terminates the stream
pub const END_MARKER: u8 = 0x00;

/// Tokens described by one tag byte
pub const TOKENS_PER_TAG: usize = 8;

/// Shortest match the descriptor can express
pub const MIN_MATCH: usize = 2;
/// Shortest match the packer emits (avoids colliding with [END_MARKER])
pub const MIN_PACKED_MATCH: usize = 3;
/// Longest match the descriptor can express
pub const MAX_MATCH: usize = 0x0f + MIN_MATCH;
/// Furthest back a match can reach
pub const MAX_OFFSET: usize = 0xfff;

/// Decode a match descriptor into `(offset, len)`
#[inline(always)]
pub(crate) fn split_descriptor(b0: u8, b1: u8) -> (usize, usize) {
    let offset = (((b0 & 0xf0) as usize) << 4) | b1 as usize;
    let len = (b0 & 0x0f) as usize + MIN_MATCH;
    (offset, len)
}

/// Encode `(offset, len)` as a match descriptor
#[inline]
pub(crate) fn join_descriptor(offset: usize, len: usize) -> [u8; 2] {
    debug_assert!(offset >= 1 && offset <= MAX_OFFSET);
    debug_assert!(len >= MIN_MATCH && len <= MAX_MATCH);

    let b0 = (((offset >> 8) << 4) | (len - MIN_MATCH)) as u8;
    let b1 = offset as u8;
    [b0, b1]
}

/// Read the original length out of a stream header
///
/// Returns `None` if the input is shorter than the header.
pub fn unpacked_len(inp: &[u8]) -> Option<usize> {
    let hdr = inp.first_chunk::<HEADER_LEN>()?;
    Some(u32::from_be_bytes(*hdr) as usize)
}

/// Worst-case packed size for an input of `n` bytes
///
/// Every byte stored as a literal, plus the tags, the header and the end
/// marker.
pub const fn max_packed_len(n: usize) -> usize {
    let tokens = n + 1;
    HEADER_LEN + n + (tokens + TOKENS_PER_TAG - 1) / TOKENS_PER_TAG + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_v1() {
        // any change here is a new FORMAT_VERSION
        assert_eq!(FORMAT_VERSION, 1);
        assert_eq!((HEADER_LEN, END_MARKER, TOKENS_PER_TAG), (4, 0, 8));
        assert_eq!((MIN_MATCH, MAX_MATCH, MAX_OFFSET), (2, 17, 4095));
    }

    #[test]
    fn test_split_descriptor() {
        assert_eq!(split_descriptor(0x01, 0x01), (1, 3));
        assert_eq!(split_descriptor(0x0f, 0x01), (1, 17));
        assert_eq!(split_descriptor(0xf0, 0xff), (4095, 2));
        assert_eq!(split_descriptor(0x35, 0x10), (0x310, 7));
    }

    #[test]
    fn test_join_descriptor() {
        assert_eq!(join_descriptor(1, 3), [0x01, 0x01]);
        assert_eq!(join_descriptor(4095, 17), [0xff, 0xff]);
        assert_eq!(join_descriptor(0x310, 7), [0x35, 0x10]);
        // offset >= 256 lets a length-2 match through
        assert_ne!(join_descriptor(0x100, 2)[0], END_MARKER);
    }

    #[test]
    fn test_unpacked_len() {
        assert_eq!(unpacked_len(&[0, 0, 0, 4, 0x60]), Some(4));
        assert_eq!(unpacked_len(&[0x00, 0x01, 0x02, 0x03]), Some(0x010203));
        assert_eq!(unpacked_len(&[0, 0, 0]), None);
    }

    #[test]
    fn test_max_packed_len() {
        // header + tag + end marker
        assert_eq!(max_packed_len(0), 6);
        // 7 literals and the end marker fit in one tag
        assert_eq!(max_packed_len(7), 4 + 7 + 1 + 1);
        assert_eq!(max_packed_len(8), 4 + 8 + 2 + 1);
    }
}
