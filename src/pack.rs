use core::fmt;
use core::mem;

use log::debug;

use crate::format::*;
use crate::util::*;

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

const HTAB_LOG2: usize = 12;
const HTAB_SZ: usize = 1 << HTAB_LOG2;

/// Packing errors
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum PackError {
    /// The output buffer was too small to hold all the output.
    ///
    /// The output that has been written is *not* a valid stream.
    OutputTooSmall,
    /// The input length does not fit in the stream header
    InputTooLong,
}
impl fmt::Display for PackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackError::OutputTooSmall => write!(f, "output buffer was insufficient"),
            PackError::InputTooLong => write!(f, "input does not fit a 32-bit length"),
        }
    }
}
#[cfg(feature = "std")]
impl std::error::Error for PackError {}

trait OutputHelper {
    fn pos(&self) -> usize;
    fn putc(&mut self, c: u8) -> Result<(), PackError>;
    fn put_buf(&mut self, buf: &[u8]) -> Result<(), PackError>;
    /// OR bits into a byte that was already written
    fn poke(&mut self, pos: usize, bits: u8);
}
impl<'a> OutputHelper for BufOutput<'a> {
    fn pos(&self) -> usize {
        self.pos
    }
    fn putc(&mut self, c: u8) -> Result<(), PackError> {
        if self.pos < self.buf.len() {
            self.buf[self.pos] = c;
            self.pos += 1;
            Ok(())
        } else {
            Err(PackError::OutputTooSmall)
        }
    }
    fn put_buf(&mut self, buf: &[u8]) -> Result<(), PackError> {
        let mut len = buf.len();
        let mut did_overflow = false;
        if self.pos + len > self.buf.len() {
            did_overflow = true;
            len = self.buf.len() - self.pos;
        }

        self.buf[self.pos..self.pos + len].copy_from_slice(&buf[..len]);
        self.pos += len;

        if did_overflow {
            Err(PackError::OutputTooSmall)
        } else {
            Ok(())
        }
    }
    fn poke(&mut self, pos: usize, bits: u8) {
        self.buf[pos] |= bits;
    }
}

#[cfg(feature = "alloc")]
impl OutputHelper for VecOutput {
    fn pos(&self) -> usize {
        self.vec.len()
    }
    fn putc(&mut self, c: u8) -> Result<(), PackError> {
        self.vec.push(c);
        Ok(())
    }
    fn put_buf(&mut self, buf: &[u8]) -> Result<(), PackError> {
        self.vec.extend_from_slice(buf);
        Ok(())
    }
    fn poke(&mut self, pos: usize, bits: u8) {
        self.vec[pos] |= bits;
    }
}

/// Writes tokens, opening a new tag byte every eight of them
struct TokenOutput<O> {
    out: O,
    tag_pos: usize,
    /// tokens already described by the current tag
    tag_used: usize,
}
impl<O: OutputHelper> TokenOutput<O> {
    fn new(out: O) -> Self {
        Self {
            out,
            tag_pos: 0,
            // forces a tag before the first token
            tag_used: TOKENS_PER_TAG,
        }
    }

    fn put_header(&mut self, len: u32) -> Result<(), PackError> {
        self.out.put_buf(&len.to_be_bytes())
    }

    fn token(&mut self, is_match: bool) -> Result<(), PackError> {
        if self.tag_used == TOKENS_PER_TAG {
            self.tag_pos = self.out.pos();
            self.out.putc(0)?;
            self.tag_used = 0;
        }
        if is_match {
            self.out.poke(self.tag_pos, 0x80 >> self.tag_used);
        }
        self.tag_used += 1;
        Ok(())
    }

    fn put_end(&mut self) -> Result<(), PackError> {
        self.token(true)?;
        self.out.putc(END_MARKER)
    }
}

impl<O: OutputHelper> OutputSink<PackError> for TokenOutput<O> {
    fn put_lits(&mut self, lits: &[u8]) -> Result<(), PackError> {
        for &c in lits {
            self.token(false)?;
            self.out.putc(c)?;
        }
        Ok(())
    }

    fn put_backref(&mut self, offset: usize, mut len: usize) -> Result<(), PackError> {
        debug_assert!(offset >= 1 && offset <= MAX_OFFSET);
        debug_assert!(len >= MIN_PACKED_MATCH);

        // split long matches into several with the same offset,
        // keeping every piece at least MIN_PACKED_MATCH long
        while len > MAX_MATCH {
            let piece = if len >= MAX_MATCH + MIN_PACKED_MATCH {
                MAX_MATCH
            } else {
                len - MIN_PACKED_MATCH
            };
            self.token(true)?;
            self.out.put_buf(&join_descriptor(offset, piece))?;
            len -= piece;
        }

        self.token(true)?;
        self.out.put_buf(&join_descriptor(offset, len))
    }
}

fn pack_hash(v: u32) -> usize {
    let h = v.wrapping_mul(2654435769);
    let h = h >> (32 - HTAB_LOG2);
    h as usize
}

trait InputHelper {
    fn inc(&mut self, n: usize);
    fn peek3(&self) -> Option<u32>;
}
impl InputHelper for &[u8] {
    fn inc(&mut self, n: usize) {
        *self = &self[n..];
    }
    fn peek3(&self) -> Option<u32> {
        let b = self.first_chunk::<3>()?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }
}

/// Holds state for packing
///
/// The hash table is 32 KiB on 64-bit hosts; keep the state around (or box
/// it) rather than building one per call.
pub struct PackState {
    htab: [usize; HTAB_SZ],
}
impl Default for PackState {
    fn default() -> Self {
        Self::new()
    }
}
/// Length to store in the header, if `len` fits in one
fn header_len(len: usize) -> Result<u32, PackError> {
    u32::try_from(len).map_err(|_| PackError::InputTooLong)
}

impl PackState {
    /// Allocate a new packing state
    pub fn new() -> Self {
        Self { htab: [0; HTAB_SZ] }
    }

    fn pack_impl<O: OutputHelper>(
        &mut self,
        mut inp: &[u8],
        outp: &mut TokenOutput<O>,
    ) -> Result<(), PackError> {
        let total = header_len(inp.len())?;
        outp.put_header(total)?;

        if inp.is_empty() {
            return outp.put_end();
        }

        self.htab.fill(0);

        let orig_inp = inp;
        let mut lits_start_anchor_pos = 0;

        // nothing to refer back to yet
        inp.inc(1);

        while let Some(hash_head) = inp.peek3() {
            let hash = pack_hash(hash_head);
            let cur_pos = orig_inp.len() - inp.len();
            let ref_pos = mem::replace(&mut self.htab[hash], cur_pos);
            let ref_ = &orig_inp[ref_pos..];
            debug_assert!(cur_pos > ref_pos);
            let offset = cur_pos - ref_pos;

            if offset <= MAX_OFFSET && inp[..3] == ref_[..3] {
                // we have a match of at least three bytes
                let len = 3 + inp[3..]
                    .iter()
                    .zip(ref_[3..].iter())
                    .take_while(|(a, b)| a == b)
                    .count();

                // any accumulated lits?
                let lits = &orig_inp[lits_start_anchor_pos..cur_pos];
                if !lits.is_empty() {
                    outp.put_lits(lits)?;
                }

                outp.put_backref(offset, len)?;
                lits_start_anchor_pos = cur_pos + len;

                // update hashes at the boundary
                inp.inc(len - 2);
                if let Some(hash_head) = inp.peek3() {
                    let cur_pos = orig_inp.len() - inp.len();
                    self.htab[pack_hash(hash_head)] = cur_pos;
                    inp.inc(1);
                    if let Some(hash_head) = inp.peek3() {
                        self.htab[pack_hash(hash_head)] = cur_pos + 1;
                    }
                    inp.inc(1);
                } else {
                    break;
                }
            } else {
                // no match
                inp.inc(1);
            }
        }

        // if there's anything leftover, output it
        let lits = &orig_inp[lits_start_anchor_pos..];
        if !lits.is_empty() {
            outp.put_lits(lits)?;
        }

        outp.put_end()
    }

    /// Pack the input into a preallocated buffer
    ///
    /// A buffer of [max_packed_len] bytes is always big enough.
    /// Returns the packed size on success, or an error otherwise
    pub fn pack_to_buf(&mut self, inp: &[u8], outp: &mut [u8]) -> Result<usize, PackError> {
        let mut outp = TokenOutput::new(BufOutput::from(outp));
        self.pack_impl(inp, &mut outp)?;
        debug!("packed {} -> {} bytes", inp.len(), outp.out.pos);
        Ok(outp.out.pos)
    }

    #[cfg(feature = "alloc")]
    /// Pack the input into a [Vec](alloc::vec::Vec)
    ///
    /// Returns the result on success, or an error otherwise
    pub fn pack_to_vec(&mut self, inp: &[u8]) -> Result<alloc::vec::Vec<u8>, PackError> {
        // reject before reserving the worst case
        header_len(inp.len())?;
        let ret = alloc::vec::Vec::with_capacity(max_packed_len(inp.len()));
        let mut ret = TokenOutput::new(VecOutput::from(ret));
        self.pack_impl(inp, &mut ret)?;
        debug!("packed {} -> {} bytes", inp.len(), ret.out.vec.len());
        Ok(ret.out.vec)
    }
}
