//! Boundary of the Skunkboard debug link
//!
//! The development cartridge gives the Jaguar a console and a very small file
//! API on the host PC. The driver itself lives elsewhere; this module only
//! describes the channel ([DebugLink]) and keeps callers inside its limits:
//!
//! * console reads are at most [CONSOLE_READ_MAX] bytes and are not
//!   NUL-terminated,
//! * file writes are at most [FILE_WRITE_MAX] bytes and must be of even
//!   length,
//! * file reads return 0 at EOF (or on error).

use core::fmt;

use log::{debug, warn};

use crate::depack::{unpack_to_buf, DepackError};

#[cfg(feature = "std")]
extern crate std;

pub const CONSOLE_READ_MAX: usize = 4064;
pub const FILE_WRITE_MAX: usize = 4060;

/// How a file on the host is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FileMode {
    Write = 0,
    Read = 1,
}

/// The raw operations of the debug link
///
/// Implementations may assume the limits in the module docs are respected;
/// the helpers in this module guarantee it.
pub trait DebugLink {
    fn console_write(&mut self, s: &str);
    /// Fill all of `buf` (at most [CONSOLE_READ_MAX] bytes) from the console
    fn console_read(&mut self, buf: &mut [u8]);
    fn file_open(&mut self, name: &str, mode: FileMode);
    /// `data` is even in length and at most [FILE_WRITE_MAX] bytes
    fn file_write(&mut self, data: &[u8]);
    /// Returns the number of bytes read, 0 on EOF or error
    fn file_read(&mut self, buf: &mut [u8]) -> usize;
    fn file_close(&mut self);
}

/// Debug link errors
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum LinkError {
    /// The file on the host is bigger than the buffer given for it
    BufferFull,
    /// The file arrived but did not depack
    Depack(DepackError),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::BufferFull => write!(f, "file does not fit in the buffer"),
            LinkError::Depack(e) => write!(f, "depack failed: {}", e),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let LinkError::Depack(e) = self {
            Some(e)
        } else {
            None
        }
    }
}

impl From<DepackError> for LinkError {
    fn from(e: DepackError) -> Self {
        LinkError::Depack(e)
    }
}

/// Read `buf.len()` console bytes, in as many calls as the link needs
pub fn read_console<L: DebugLink + ?Sized>(link: &mut L, buf: &mut [u8]) {
    for chunk in buf.chunks_mut(CONSOLE_READ_MAX) {
        link.console_read(chunk);
    }
}

/// Streams a file to the host in chunks the link accepts
///
/// Data is buffered and sent [FILE_WRITE_MAX] bytes at a time. An odd byte
/// left at the end is padded with a zero, so the host file may be one byte
/// longer than what was written.
pub struct FileWriter<'a, L: DebugLink + ?Sized> {
    link: &'a mut L,
    buf: [u8; FILE_WRITE_MAX],
    len: usize,
}

impl<'a, L: DebugLink + ?Sized> FileWriter<'a, L> {
    /// Open `name` on the host for writing
    pub fn create(link: &'a mut L, name: &str) -> Self {
        link.file_open(name, FileMode::Write);
        Self {
            link,
            buf: [0; FILE_WRITE_MAX],
            len: 0,
        }
    }

    pub fn write(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let n = usize::min(data.len(), FILE_WRITE_MAX - self.len);
            self.buf[self.len..self.len + n].copy_from_slice(&data[..n]);
            self.len += n;
            data = &data[n..];

            if self.len == FILE_WRITE_MAX {
                self.link.file_write(&self.buf);
                self.len = 0;
            }
        }
    }

    /// Flush what is left and close the file
    ///
    /// Dropping the writer does the same.
    pub fn finish(self) {}

    fn close(&mut self) {
        if self.len % 2 != 0 {
            self.buf[self.len] = 0;
            self.len += 1;
        }
        if self.len > 0 {
            self.link.file_write(&self.buf[..self.len]);
            self.len = 0;
        }
        self.link.file_close();
    }
}

impl<L: DebugLink + ?Sized> Drop for FileWriter<'_, L> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Write `data` to a new host file called `name`
pub fn send_file<L: DebugLink + ?Sized>(link: &mut L, name: &str, data: &[u8]) {
    let mut w = FileWriter::create(link, name);
    w.write(data);
    w.finish();
}

/// Read the host file `name` into `buf`, returning its length
pub fn read_file<L: DebugLink + ?Sized>(
    link: &mut L,
    name: &str,
    buf: &mut [u8],
) -> Result<usize, LinkError> {
    link.file_open(name, FileMode::Read);

    let mut pos = 0;
    let res = loop {
        if pos == buf.len() {
            // only an error if there is actually more to come
            let mut peek = [0u8; 1];
            if link.file_read(&mut peek) != 0 {
                break Err(LinkError::BufferFull);
            }
            break Ok(pos);
        }
        let n = link.file_read(&mut buf[pos..]);
        if n == 0 {
            break Ok(pos);
        }
        pos += n;
    };

    link.file_close();
    res
}

/// Fetch a packed asset over the link and depack it
///
/// `scratch` holds the packed bytes; `outp` receives the unpacked ones.
/// Returns the unpacked size.
pub fn fetch_and_unpack<L: DebugLink + ?Sized>(
    link: &mut L,
    name: &str,
    scratch: &mut [u8],
    outp: &mut [u8],
) -> Result<usize, LinkError> {
    let packed_len = read_file(link, name, scratch).map_err(|e| {
        warn!("could not fetch {}: {}", name, e);
        e
    })?;
    let n = unpack_to_buf(&scratch[..packed_len], outp)?;
    debug!("fetched {} ({} packed, {} unpacked)", name, packed_len, n);
    Ok(n)
}
