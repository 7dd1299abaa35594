//! LZ77 depacker for the Atari Jaguar GPU
//!
//! The depack routine lives in GPU local RAM ([gpu]); packed assets use the
//! stream layout in [format], produced by [PackState] and read back by
//! [unpack_to_buf] (checked) or [unpack_unchecked] (the zero-check fast path).

#![no_std]

mod depack;
pub mod format;
pub mod gpu;
mod pack;
pub mod skunk;
mod util;

#[cfg(feature = "alloc")]
pub use depack::unpack_to_vec;
pub use depack::{unpack_to_buf, unpack_unchecked, DepackError};
pub use format::{max_packed_len, unpacked_len};
pub use gpu::{init, try_init, GpuRam, LoadError, Lz77Routine, RunError};
pub use pack::{PackError, PackState};
pub use util::align_long;

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(test)]
extern crate std;
