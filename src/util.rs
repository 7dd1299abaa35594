#[cfg(feature = "alloc")]
extern crate alloc;

/// Internal abstraction for types of outputs (slice, Vec, raw pointer)
///
/// Note for all functions: we guarantee writing all the way up to the limit
pub(crate) trait OutputSink<ErrTy> {
    /// Add the given literal run to the output
    ///
    /// If this would overflow the output, return Err.
    fn put_lits(&mut self, lits: &[u8]) -> Result<(), ErrTy>;
    /// Add a backreference to the output
    ///
    /// An `offset` of 1 means the byte just before the current position.
    /// Increasing `offset` means further backwards
    ///
    /// Copy `len` bytes, which as usual for LZ77 may exceed `offset`.
    fn put_backref(&mut self, offset: usize, len: usize) -> Result<(), ErrTy>;
}

/// Internal abstraction for where tokens are read from (slice vs raw pointer)
pub(crate) trait InputSource<ErrTy> {
    /// Take the next byte
    fn get(&mut self) -> Result<u8, ErrTy>;
    /// Take the next `n` bytes
    fn take(&mut self, n: usize) -> Result<&[u8], ErrTy>;
}

pub(crate) struct BufOutput<'a> {
    pub pos: usize,
    pub buf: &'a mut [u8],
}
impl<'a> From<&'a mut [u8]> for BufOutput<'a> {
    fn from(buf: &'a mut [u8]) -> Self {
        Self { pos: 0, buf }
    }
}

#[cfg(feature = "alloc")]
pub(crate) struct VecOutput {
    pub vec: alloc::vec::Vec<u8>,
}
#[cfg(feature = "alloc")]
impl From<alloc::vec::Vec<u8>> for VecOutput {
    fn from(vec: alloc::vec::Vec<u8>) -> Self {
        Self { vec }
    }
}

/// Output straight to memory with no bounds at all
pub(crate) struct RawOutput {
    pub pos: usize,
    pub base: *mut u8,
}

/// Input straight from memory, trusting the stream to terminate itself
pub(crate) struct RawInput {
    pub ptr: *const u8,
}

/// Round `addr` up to the next long-word (4 byte) boundary
///
/// `None` if that boundary is past the end of the address space.
#[inline]
pub const fn align_long(addr: u32) -> Option<u32> {
    match addr.checked_add(3) {
        Some(a) => Some(a & !3),
        None => None,
    }
}
