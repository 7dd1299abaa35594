use core::convert::Infallible;
use core::fmt::{self};
use core::ptr;

use log::{trace, warn};

use crate::format::*;
use crate::util::*;

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

/// Depacking errors
///
/// Only the checked entry points report these. [unpack_unchecked] trusts
/// the stream completely.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum DepackError {
    /// The stream ended before its end marker
    InputTruncated,
    /// A match reached back before the start of the output (or had offset 0)
    InvalidBackreference,
    /// The output buffer was too small to hold all the output.
    ///
    /// Output up to the end of the buffer *has* been written.
    OutputTooSmall,
    /// The end marker was reached after a different number of bytes than
    /// the header announced
    LengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for DepackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepackError::InputTruncated => write!(f, "input was truncated"),
            DepackError::InvalidBackreference => write!(f, "invalid backreference"),
            DepackError::OutputTooSmall => write!(f, "output buffer was insufficient"),
            DepackError::LengthMismatch { expected, actual } => write!(
                f,
                "header says {} bytes but stream decoded to {}",
                expected, actual
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DepackError {}

impl<'a> OutputSink<DepackError> for BufOutput<'a> {
    fn put_lits(&mut self, lits: &[u8]) -> Result<(), DepackError> {
        let mut len = lits.len();
        let mut did_overflow = false;
        if self.pos + len > self.buf.len() {
            did_overflow = true;
            len = self.buf.len() - self.pos;
        }

        self.buf[self.pos..self.pos + len].copy_from_slice(&lits[..len]);
        self.pos += len;

        if did_overflow {
            Err(DepackError::OutputTooSmall)
        } else {
            Ok(())
        }
    }

    fn put_backref(&mut self, offset: usize, mut len: usize) -> Result<(), DepackError> {
        if offset == 0 || offset > self.pos {
            return Err(DepackError::InvalidBackreference);
        }

        let mut did_overflow = false;
        if self.pos + len > self.buf.len() {
            did_overflow = true;
            len = self.buf.len() - self.pos;
        }

        // byte by byte, since the source may run into what we are writing
        for i in 0..len {
            self.buf[self.pos + i] = self.buf[self.pos - offset + i];
        }
        self.pos += len;

        if did_overflow {
            Err(DepackError::OutputTooSmall)
        } else {
            Ok(())
        }
    }
}

#[cfg(feature = "alloc")]
impl OutputSink<DepackError> for VecOutput {
    fn put_lits(&mut self, lits: &[u8]) -> Result<(), DepackError> {
        self.vec.extend_from_slice(lits);
        Ok(())
    }

    fn put_backref(&mut self, offset: usize, len: usize) -> Result<(), DepackError> {
        let pos = self.vec.len();
        if offset == 0 || offset > pos {
            return Err(DepackError::InvalidBackreference);
        }

        self.vec.reserve(len);
        for i in 0..len {
            let b = self.vec[pos - offset + i];
            self.vec.push(b);
        }

        Ok(())
    }
}

impl OutputSink<Infallible> for RawOutput {
    #[inline(always)]
    fn put_lits(&mut self, lits: &[u8]) -> Result<(), Infallible> {
        // SAFETY: caller of unpack_unchecked guarantees room and no overlap
        unsafe {
            ptr::copy_nonoverlapping(lits.as_ptr(), self.base.add(self.pos), lits.len());
        }
        self.pos += lits.len();
        Ok(())
    }

    #[inline(always)]
    fn put_backref(&mut self, offset: usize, len: usize) -> Result<(), Infallible> {
        // SAFETY: caller of unpack_unchecked guarantees a well-formed stream
        unsafe {
            let mut src = self.base.add(self.pos - offset);
            let mut dst = self.base.add(self.pos);
            for _ in 0..len {
                dst.write(src.read());
                src = src.add(1);
                dst = dst.add(1);
            }
        }
        self.pos += len;
        Ok(())
    }
}

impl<'a> InputSource<DepackError> for &'a [u8] {
    #[inline]
    fn get(&mut self) -> Result<u8, DepackError> {
        let s: &'a [u8] = *self;
        let (&b, rest) = s.split_first().ok_or(DepackError::InputTruncated)?;
        *self = rest;
        Ok(b)
    }

    #[inline]
    fn take(&mut self, n: usize) -> Result<&[u8], DepackError> {
        if self.len() < n {
            return Err(DepackError::InputTruncated);
        }
        let s: &'a [u8] = *self;
        let (head, rest) = s.split_at(n);
        *self = rest;
        Ok(head)
    }
}

impl InputSource<Infallible> for RawInput {
    #[inline(always)]
    fn get(&mut self) -> Result<u8, Infallible> {
        // SAFETY: caller of unpack_unchecked guarantees a terminated stream
        unsafe {
            let b = self.ptr.read();
            self.ptr = self.ptr.add(1);
            Ok(b)
        }
    }

    #[inline(always)]
    fn take(&mut self, n: usize) -> Result<&[u8], Infallible> {
        // SAFETY: as above
        unsafe {
            let s = core::slice::from_raw_parts(self.ptr, n);
            self.ptr = self.ptr.add(n);
            Ok(s)
        }
    }
}

/// The token loop shared by every entry point
///
/// Starts right after the header and stops at the end marker.
#[inline(always)]
fn unpack_impl<E, I, O>(inp: &mut I, outp: &mut O) -> Result<(), E>
where
    I: InputSource<E>,
    O: OutputSink<E>,
{
    loop {
        let mut tag = inp.get()?;

        if tag == 0 {
            // a whole group of literals
            outp.put_lits(inp.take(TOKENS_PER_TAG)?)?;
            continue;
        }

        for _ in 0..TOKENS_PER_TAG {
            let is_match = tag & 0x80 != 0;
            tag <<= 1;

            if !is_match {
                outp.put_lits(inp.take(1)?)?;
                continue;
            }

            let b0 = inp.get()?;
            if b0 == END_MARKER {
                return Ok(());
            }
            let b1 = inp.get()?;
            let (offset, len) = split_descriptor(b0, b1);
            outp.put_backref(offset, len)?;
        }
    }
}

/// Depack into a preallocated buffer, checking everything along the way
///
/// Returns the number of bytes written, which is the unpacked size.
pub fn unpack_to_buf(inp: &[u8], outp: &mut [u8]) -> Result<usize, DepackError> {
    let expected = unpacked_len(inp).ok_or(DepackError::InputTruncated)?;
    let mut body = &inp[HEADER_LEN..];
    let mut outp: BufOutput = outp.into();

    if let Err(e) = unpack_impl(&mut body, &mut outp) {
        warn!("depack failed after {} bytes: {}", outp.pos, e);
        return Err(e);
    }
    check_len(expected, outp.pos)?;

    trace!("depacked {} -> {} bytes", inp.len() - body.len(), outp.pos);
    Ok(outp.pos)
}

/// Depack into a [Vec](alloc::vec::Vec)
///
/// The header length (capped by the most the stream could expand to) is
/// used as the capacity unless `capacity_hint` is given.
#[cfg(feature = "alloc")]
pub fn unpack_to_vec(
    inp: &[u8],
    capacity_hint: Option<usize>,
) -> Result<alloc::vec::Vec<u8>, DepackError> {
    let expected = unpacked_len(inp).ok_or(DepackError::InputTruncated)?;
    let mut body = &inp[HEADER_LEN..];
    let capacity = capacity_hint.unwrap_or(usize::min(
        expected,
        inp.len().saturating_mul(MAX_MATCH),
    ));
    let mut ret: VecOutput = alloc::vec::Vec::with_capacity(capacity).into();

    if let Err(e) = unpack_impl(&mut body, &mut ret) {
        warn!("depack failed after {} bytes: {}", ret.vec.len(), e);
        return Err(e);
    }
    check_len(expected, ret.vec.len())?;

    Ok(ret.vec)
}

fn check_len(expected: usize, actual: usize) -> Result<(), DepackError> {
    if expected != actual {
        let e = DepackError::LengthMismatch { expected, actual };
        warn!("{}", e);
        return Err(e);
    }
    Ok(())
}

/// Depack with no checks whatsoever
///
/// This is the fast path the GPU routine implements: no length is passed in,
/// the header is skipped without being read, and decoding stops only at the
/// in-stream end marker. Returns the number of bytes written.
///
/// # Safety
///
/// * `inp` must point at a well-formed, terminated stream.
/// * `outp` must be valid for writes of the whole unpacked payload.
/// * The two regions must not overlap.
pub unsafe fn unpack_unchecked(inp: *const u8, outp: *mut u8) -> usize {
    let mut inp = RawInput {
        ptr: inp.add(HEADER_LEN),
    };
    let mut outp = RawOutput { pos: 0, base: outp };

    match unpack_impl(&mut inp, &mut outp) {
        Ok(()) => outp.pos,
        Err(never) => match never {},
    }
}
