//! Loading the depack routine into GPU local RAM
//!
//! The Jaguar GPU runs code out of its own 4 KiB of local RAM. The caller
//! decides where in that RAM the routine goes; loading it reports the first
//! long-aligned address after it, which is where the caller's next routine or
//! buffer can start.
//!
//! ```text
//! GPU_RAM_START                                             GPU_RAM_END
//! | ... | routine image | pad to 4 | free for the caller ... |
//!       ^ addr                     ^ end_addr(addr)
//! ```

use core::fmt;
use core::ptr;

use log::{debug, warn};

use crate::depack::{unpack_to_buf, DepackError};
use crate::util::align_long;

#[cfg(feature = "std")]
extern crate std;

// 4KB = 0x0000_1000  (mask: 0x0000_0FFF)

pub const GPU_RAM_START: u32 = 0x00F0_3000;
pub const GPU_RAM_SIZE: u32 = 0x0000_1000;
pub const GPU_RAM_MASK: u32 = GPU_RAM_SIZE - 1;
pub const GPU_RAM_END: u32 = GPU_RAM_START + GPU_RAM_SIZE;

/// Alignment the GPU needs for code and long-word data
pub const LONG_ALIGN: u32 = 4;

/// A fixed piece of GPU object code
///
/// Never built at runtime; see [LZ77_ROUTINE].
#[derive(Debug, Clone, Copy)]
pub struct RoutineImage {
    code: &'static [u8],
}

/// The depack routine's GPU object code, embedded verbatim
pub static LZ77_ROUTINE: RoutineImage = RoutineImage::new(include_bytes!("../gpu/lz77.bin"));

impl RoutineImage {
    pub const fn new(code: &'static [u8]) -> Self {
        Self { code }
    }

    pub const fn len(&self) -> usize {
        self.code.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub const fn bytes(&self) -> &'static [u8] {
        self.code
    }

    /// First long-aligned address after this image when loaded at `addr`
    ///
    /// `None` if that address does not fit in 32 bits.
    pub const fn end_addr(&self, addr: u32) -> Option<u32> {
        if self.code.len() > u32::MAX as usize {
            return None;
        }
        match addr.checked_add(self.code.len() as u32) {
            Some(end) => align_long(end),
            None => None,
        }
    }

    /// Copy the image to `addr` with no checks, returning the end address
    ///
    /// # Panics
    ///
    /// If the image would not lie inside GPU RAM.
    pub fn load(&self, ram: &mut GpuRam, addr: u32) -> u32 {
        let off = addr.wrapping_sub(GPU_RAM_START) as usize;
        let end = off + self.code.len();
        ram.mem[off..end].copy_from_slice(self.code);
        // GPU_RAM_START is long aligned, so aligning the offset is enough
        GPU_RAM_START + ((end + 3) & !3) as u32
    }

    /// Copy the image to `addr` after checking alignment and bounds
    pub fn try_load(&self, ram: &mut GpuRam, addr: u32) -> Result<u32, LoadError> {
        if addr % LONG_ALIGN != 0 {
            warn!("refusing to load GPU routine at misaligned {:#08x}", addr);
            return Err(LoadError::Misaligned(addr));
        }
        let fits = addr >= GPU_RAM_START
            && (addr as u64 + self.code.len() as u64) <= GPU_RAM_END as u64;
        if !fits {
            warn!(
                "GPU routine of {} bytes does not fit at {:#08x}",
                self.code.len(),
                addr
            );
            return Err(LoadError::OutOfRange {
                addr,
                len: self.code.len(),
            });
        }

        let end = self.load(ram, addr);
        debug!(
            "loaded {} byte GPU routine at {:#08x}, free from {:#08x}",
            self.code.len(),
            addr,
            end
        );
        Ok(end)
    }

    /// Whether the bytes at `addr` are this image
    pub fn is_loaded_at(&self, ram: &GpuRam, addr: u32) -> bool {
        let end = addr.wrapping_add(self.code.len() as u32);
        ram.region(addr, end) == Some(self.code)
    }
}

/// Errors from the checked loader
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum LoadError {
    /// The address is not a multiple of [LONG_ALIGN]
    Misaligned(u32),
    /// The image would not lie entirely inside GPU RAM
    OutOfRange { addr: u32, len: usize },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Misaligned(addr) => write!(f, "address {:#08x} is not long aligned", addr),
            LoadError::OutOfRange { addr, len } => write!(
                f,
                "{} bytes at {:#08x} do not fit in GPU RAM",
                len, addr
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LoadError {}

/// GPU local RAM, addressed the way the GPU sees it
///
/// This is the host-side stand-in for the real memory-mapped RAM; addresses
/// are absolute (`GPU_RAM_START..GPU_RAM_END`).
#[derive(Clone)]
pub struct GpuRam {
    mem: [u8; GPU_RAM_SIZE as usize],
}

impl Default for GpuRam {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GpuRam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuRam")
            .field("start", &GPU_RAM_START)
            .field("size", &GPU_RAM_SIZE)
            .finish_non_exhaustive()
    }
}

impl GpuRam {
    pub const fn new() -> Self {
        Self {
            mem: [0; GPU_RAM_SIZE as usize],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mem
    }

    /// Byte at `addr`, if it is in GPU RAM
    #[inline]
    pub fn read_u8(&self, addr: u32) -> Option<u8> {
        let (s, _) = Self::range(addr, addr.checked_add(1)?)?;
        Some(self.mem[s])
    }

    /// Big-endian long at `addr`
    ///
    /// `None` unless `addr` is long aligned and the long lies in GPU RAM.
    #[inline]
    pub fn read_u32(&self, addr: u32) -> Option<u32> {
        if addr % LONG_ALIGN != 0 {
            return None;
        }
        let long = self.region(addr, addr.checked_add(LONG_ALIGN)?)?;
        Some(u32::from_be_bytes([long[0], long[1], long[2], long[3]]))
    }

    fn range(start: u32, end: u32) -> Option<(usize, usize)> {
        if start < GPU_RAM_START || end > GPU_RAM_END || start > end {
            return None;
        }
        Some((
            (start - GPU_RAM_START) as usize,
            (end - GPU_RAM_START) as usize,
        ))
    }

    /// The bytes in `start..end`, if that lies inside GPU RAM
    pub fn region(&self, start: u32, end: u32) -> Option<&[u8]> {
        let (s, e) = Self::range(start, end)?;
        Some(&self.mem[s..e])
    }

    /// Mutable bytes in `start..end`, e.g. for a depack buffer after a routine
    pub fn region_mut(&mut self, start: u32, end: u32) -> Option<&mut [u8]> {
        let (s, e) = Self::range(start, end)?;
        Some(&mut self.mem[s..e])
    }
}

/// Load the depack routine at `addr`, returning the end address
///
/// `addr` should be long aligned; this is not checked. Loading again
/// somewhere else is fine, but anything bound to the old location is stale.
///
/// # Panics
///
/// If the routine would not lie inside GPU RAM.
pub fn init(ram: &mut GpuRam, addr: u32) -> u32 {
    LZ77_ROUTINE.load(ram, addr)
}

/// Load the depack routine at `addr`, checking alignment and bounds
pub fn try_init(ram: &mut GpuRam, addr: u32) -> Result<u32, LoadError> {
    LZ77_ROUTINE.try_load(ram, addr)
}

/// End address of the depack routine if loaded at `addr`
pub fn end_addr(addr: u32) -> Option<u32> {
    LZ77_ROUTINE.end_addr(addr)
}

/// Copy the depack routine to memory-mapped GPU RAM
///
/// Returns a pointer to the first long-aligned byte after it.
///
/// # Safety
///
/// `dst` must be long aligned and valid for writes of the whole image, and
/// nothing else may be using that memory.
pub unsafe fn init_at(dst: *mut u8) -> *mut u8 {
    let code = LZ77_ROUTINE.bytes();
    ptr::copy_nonoverlapping(code.as_ptr(), dst, code.len());

    let end = dst as usize + code.len();
    let pad = end.wrapping_neg() & (LONG_ALIGN as usize - 1);
    dst.add(code.len() + pad)
}

/// A depack routine that was loaded with the checked loader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lz77Routine {
    base: u32,
    end: u32,
}

impl Lz77Routine {
    /// Load the routine at `addr`
    pub fn load(ram: &mut GpuRam, addr: u32) -> Result<Self, LoadError> {
        let end = try_init(ram, addr)?;
        Ok(Self { base: addr, end })
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// First free long-aligned address after the routine
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Whether the routine is still intact in `ram`
    ///
    /// False once it has been overwritten, e.g. by a reload elsewhere
    /// followed by other data.
    pub fn is_resident(&self, ram: &GpuRam) -> bool {
        LZ77_ROUTINE.is_loaded_at(ram, self.base)
    }

    /// Depack `inp` into GPU RAM at `start..end`, returning the unpacked size
    ///
    /// Refuses to run if the routine is no longer resident, or if the buffer
    /// is outside GPU RAM or overlaps the routine.
    pub fn unpack(
        &self,
        ram: &mut GpuRam,
        inp: &[u8],
        start: u32,
        end: u32,
    ) -> Result<usize, RunError> {
        if !self.is_resident(ram) {
            warn!("depack routine at {:#08x} is no longer resident", self.base);
            return Err(RunError::NotResident(self.base));
        }
        if start < self.end && end > self.base {
            return Err(RunError::BadBuffer { start, end });
        }
        let outp = ram
            .region_mut(start, end)
            .ok_or(RunError::BadBuffer { start, end })?;
        Ok(unpack_to_buf(inp, outp)?)
    }
}

/// Errors from running a loaded [Lz77Routine]
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum RunError {
    /// The routine loaded at this address has been overwritten
    NotResident(u32),
    /// The output buffer is outside GPU RAM or overlaps the routine
    BadBuffer { start: u32, end: u32 },
    Depack(DepackError),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::NotResident(addr) => {
                write!(f, "no depack routine resident at {:#08x}", addr)
            }
            RunError::BadBuffer { start, end } => {
                write!(f, "buffer {:#08x}..{:#08x} is not usable", start, end)
            }
            RunError::Depack(e) => write!(f, "depack failed: {}", e),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let RunError::Depack(e) = self {
            Some(e)
        } else {
            None
        }
    }
}

impl From<DepackError> for RunError {
    fn from(e: DepackError) -> Self {
        RunError::Depack(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AAAA: [u8; 9] = [0, 0, 0, 4, 0b0110_0000, b'A', 0x01, 0x01, 0x00];

    #[test]
    fn test_memory_map() {
        assert_eq!(GPU_RAM_START, 0x00F0_3000);
        assert_eq!(GPU_RAM_END, 0x00F0_4000);
        assert_eq!(GPU_RAM_START & GPU_RAM_MASK, 0);
        // the routine must leave room for data
        assert!(LZ77_ROUTINE.len() < GPU_RAM_SIZE as usize / 2);
        assert!(!LZ77_ROUTINE.is_empty());
    }

    #[test]
    fn test_end_addr_every_aligned_addr() {
        let size = LZ77_ROUTINE.len() as u32;
        let mut addr = GPU_RAM_START;
        while addr + size <= GPU_RAM_END {
            let mut ram = GpuRam::new();
            let end = init(&mut ram, addr);
            assert_eq!(end % LONG_ALIGN, 0);
            assert!(end >= addr + size);
            assert!(end < addr + size + LONG_ALIGN);
            assert!(end <= GPU_RAM_END);
            assert_eq!(Some(end), end_addr(addr));
            addr += LONG_ALIGN;
        }
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        static BLOB: [u8; GPU_RAM_SIZE as usize] = [0x5a; GPU_RAM_SIZE as usize];

        proptest! {
            #[test]
            fn proptest_end_addr_any_image(word in 0u32..0x4000_0000, len in 0usize..BLOB.len()) {
                let image = RoutineImage::new(&BLOB[..len]);
                let addr = word * LONG_ALIGN;
                match image.end_addr(addr) {
                    Some(end) => {
                        prop_assert_eq!(end % LONG_ALIGN, 0);
                        prop_assert!(end as u64 >= addr as u64 + len as u64);
                        prop_assert!((end as u64) < addr as u64 + len as u64 + LONG_ALIGN as u64);
                    }
                    None => prop_assert!(addr as u64 + len as u64 > 0xffff_fffc),
                }
            }
        }
    }

    #[test]
    fn test_end_addr_top_of_address_space() {
        let size = LZ77_ROUTINE.len() as u32;
        assert_eq!(end_addr(0xffff_ff00), None);
        assert_eq!(end_addr(u32::MAX - size + 1), None);
        assert_eq!(end_addr(0xffff_fffc - size), Some(0xffff_fffc));
    }

    #[test]
    fn test_load_copies_image() {
        let mut ram = GpuRam::new();
        let end = init(&mut ram, GPU_RAM_START + 0x100);
        assert_eq!(
            ram.region(GPU_RAM_START + 0x100, GPU_RAM_START + 0x100 + LZ77_ROUTINE.len() as u32),
            Some(LZ77_ROUTINE.bytes())
        );
        // nothing before it or in the padding is touched
        assert!(ram.region(GPU_RAM_START, GPU_RAM_START + 0x100).unwrap().iter().all(|&b| b == 0));
        let img_end = GPU_RAM_START + 0x100 + LZ77_ROUTINE.len() as u32;
        assert!(ram.region(img_end, end).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_load_twice_is_idempotent() {
        let mut once = GpuRam::new();
        let mut twice = GpuRam::new();
        let a = GPU_RAM_START + 0x40;
        let e1 = init(&mut once, a);
        let e2 = init(&mut twice, a);
        let e3 = init(&mut twice, a);
        assert_eq!(e1, e2);
        assert_eq!(e2, e3);
        assert_eq!(once.as_bytes(), twice.as_bytes());
    }

    #[test]
    fn test_reload_elsewhere() {
        let mut ram = GpuRam::new();
        let first = Lz77Routine::load(&mut ram, GPU_RAM_START).unwrap();
        let second = Lz77Routine::load(&mut ram, first.end() + 0x10).unwrap();
        assert!(first.is_resident(&ram));
        assert!(second.is_resident(&ram));

        // clobber the first copy
        let buf = ram.region_mut(first.base(), first.end()).unwrap();
        buf.fill(0xff);
        assert!(!first.is_resident(&ram));
        assert!(second.is_resident(&ram));
    }

    #[test]
    fn test_try_init_errors() {
        let mut ram = GpuRam::new();
        assert_eq!(
            try_init(&mut ram, GPU_RAM_START + 2),
            Err(LoadError::Misaligned(GPU_RAM_START + 2))
        );
        assert_eq!(
            try_init(&mut ram, GPU_RAM_START - 4),
            Err(LoadError::OutOfRange {
                addr: GPU_RAM_START - 4,
                len: LZ77_ROUTINE.len()
            })
        );
        let last = GPU_RAM_END - LONG_ALIGN;
        assert_eq!(
            try_init(&mut ram, last),
            Err(LoadError::OutOfRange {
                addr: last,
                len: LZ77_ROUTINE.len()
            })
        );
        // nothing was written
        assert!(ram.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_try_init_at_top_of_ram() {
        let mut ram = GpuRam::new();
        let addr = (GPU_RAM_END - LZ77_ROUTINE.len() as u32) & !(LONG_ALIGN - 1);
        let end = try_init(&mut ram, addr).unwrap();
        assert!(end <= GPU_RAM_END);
    }

    #[test]
    #[should_panic]
    fn test_init_outside_ram_panics() {
        let mut ram = GpuRam::new();
        init(&mut ram, GPU_RAM_END);
    }

    #[test]
    fn test_init_at_raw() {
        #[repr(align(4))]
        struct Aligned([u8; GPU_RAM_SIZE as usize]);

        let mut mem = Aligned([0; GPU_RAM_SIZE as usize]);
        let base = mem.0.as_mut_ptr();
        let end = unsafe { init_at(base) };
        let used = end as usize - base as usize;

        assert_eq!(end as usize % LONG_ALIGN as usize, 0);
        assert!(used >= LZ77_ROUTINE.len());
        assert!(used < LZ77_ROUTINE.len() + LONG_ALIGN as usize);
        assert_eq!(&mem.0[..LZ77_ROUTINE.len()], LZ77_ROUTINE.bytes());
    }

    #[test]
    fn test_read_helpers() {
        let mut ram = GpuRam::new();
        ram.region_mut(GPU_RAM_START + 8, GPU_RAM_START + 12)
            .unwrap()
            .copy_from_slice(&[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(ram.read_u32(GPU_RAM_START + 8), Some(0x1234_5678));
        assert_eq!(ram.read_u8(GPU_RAM_START + 9), Some(0x34));
        assert_eq!(ram.read_u8(GPU_RAM_END - 1), Some(0));

        // no aliasing outside GPU RAM
        ram.region_mut(GPU_RAM_START, GPU_RAM_START + 1).unwrap()[0] = 0xaa;
        assert_eq!(ram.read_u8(GPU_RAM_START), Some(0xaa));
        assert_eq!(ram.read_u8(GPU_RAM_END), None);
        assert_eq!(ram.read_u8(GPU_RAM_START - 1), None);
        assert_eq!(ram.read_u8(u32::MAX), None);
        assert_eq!(ram.read_u32(GPU_RAM_END), None);
        assert_eq!(ram.read_u32(GPU_RAM_END - 4), Some(0));
        assert_eq!(ram.read_u32(GPU_RAM_START + 0xffd), None);
        assert_eq!(ram.read_u32(0xffff_fffc), None);
        assert_eq!(ram.region(GPU_RAM_START + 8, GPU_RAM_START + 4), None);
        assert_eq!(ram.region(GPU_RAM_END, GPU_RAM_END + 1), None);
    }

    #[test]
    fn test_unpack_after_routine() {
        let mut ram = GpuRam::new();
        let routine = Lz77Routine::load(&mut ram, GPU_RAM_START).unwrap();

        let end = routine.end();
        assert_eq!(routine.unpack(&mut ram, &AAAA, end, end + 4), Ok(4));
        assert_eq!(ram.region(end, end + 4), Some(&b"AAAA"[..]));
        assert!(routine.is_resident(&ram));

        assert_eq!(
            routine.unpack(&mut ram, &AAAA, end, end + 2),
            Err(RunError::Depack(DepackError::OutputTooSmall))
        );
    }

    #[test]
    fn test_unpack_rejects_bad_buffer() {
        let mut ram = GpuRam::new();
        let routine = Lz77Routine::load(&mut ram, GPU_RAM_START + 0x100).unwrap();

        // overlapping the routine from either side
        for (start, end) in [
            (GPU_RAM_START + 0xfc, GPU_RAM_START + 0x104),
            (routine.end() - 4, routine.end() + 4),
            (routine.base(), routine.end()),
        ] {
            assert_eq!(
                routine.unpack(&mut ram, &AAAA, start, end),
                Err(RunError::BadBuffer { start, end })
            );
        }
        assert_eq!(
            routine.unpack(&mut ram, &AAAA, GPU_RAM_END, GPU_RAM_END + 4),
            Err(RunError::BadBuffer {
                start: GPU_RAM_END,
                end: GPU_RAM_END + 4
            })
        );

        // right up against it is fine
        let start = routine.base() - 4;
        assert_eq!(routine.unpack(&mut ram, &AAAA, start, routine.base()), Ok(4));
        assert!(routine.is_resident(&ram));
    }

    #[test]
    fn test_unpack_stale_routine() {
        let mut ram = GpuRam::new();
        let first = Lz77Routine::load(&mut ram, GPU_RAM_START).unwrap();
        let second = Lz77Routine::load(&mut ram, GPU_RAM_START + 0x800).unwrap();
        ram.region_mut(first.base(), first.base() + 4)
            .unwrap()
            .fill(0);

        let out = GPU_RAM_START + 0x700;
        assert_eq!(
            first.unpack(&mut ram, &AAAA, out, out + 4),
            Err(RunError::NotResident(first.base()))
        );
        // nothing was written
        assert_eq!(ram.read_u32(out), Some(0));
        assert_eq!(second.unpack(&mut ram, &AAAA, out, out + 4), Ok(4));
    }
}
