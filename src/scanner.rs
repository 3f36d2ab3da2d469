//! Random-access reading of index files.
//!
//! A [`FileScanner`] owns the file handle (or its memory mapping) and serves
//! positioned reads. It keeps no cursor of its own, so any number of threads
//! can read through a shared reference at the same time. Sequential decoding
//! from a position goes through a [`ScanCursor`], which is cheap to create
//! and owned by a single caller.

use std::borrow::Cow;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::debug;

use crate::error::{IndexError, Result};
use crate::varint::{self, MAX_VARINT_LEN};

/// Bytes fetched per read when the file is not memory mapped.
const READ_BLOCK: usize = 4096;

enum Backing {
    Mapped(Mmap),
    File(File),
}

/// Read-only random access to one file.
pub struct FileScanner {
    path: PathBuf,
    len: u64,
    backing: Option<Backing>,
}

impl FileScanner {
    pub fn open<P: AsRef<Path>>(path: P, memory_mapped: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();

        // zero-length mappings are not portable
        let backing = if memory_mapped && len > 0 {
            // SAFETY: index files are written once by the builder and only read afterwards.
            Backing::Mapped(unsafe { Mmap::map(&file)? })
        } else {
            Backing::File(file)
        };

        debug!(
            "Opened {} ({} bytes, memory mapped: {})",
            path.display(),
            len,
            matches!(backing, Backing::Mapped(_))
        );

        Ok(Self {
            path,
            len,
            backing: Some(backing),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size at open time
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_open(&self) -> bool {
        self.backing.is_some()
    }

    pub fn is_memory_mapped(&self) -> bool {
        matches!(self.backing, Some(Backing::Mapped(_)))
    }

    /// Release the file handle. Later reads fail with [`IndexError::Closed`].
    pub fn close(&mut self) {
        if self.backing.take().is_some() {
            debug!("Closed {}", self.path.display());
        }
    }

    /// Read exactly `len` bytes starting at `offset`.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        let backing = self.backing.as_ref().ok_or(IndexError::Closed)?;

        let end = offset.checked_add(len as u64);
        if end.map_or(true, |end| end > self.len) {
            return Err(IndexError::UnexpectedEof {
                offset,
                wanted: len,
                len: self.len,
            });
        }

        match backing {
            Backing::Mapped(mmap) => {
                let start = offset as usize;
                Ok(Cow::Borrowed(&mmap[start..start + len]))
            }
            Backing::File(file) => {
                let mut buf = vec![0u8; len];
                read_exact_at(file, &mut buf, offset)?;
                Ok(Cow::Owned(buf))
            }
        }
    }

    /// Start sequential decoding at `offset`.
    pub fn cursor(&self, offset: u64) -> ScanCursor<'_> {
        ScanCursor {
            scanner: self,
            window: Cow::Borrowed(&[]),
            window_start: offset,
            pos: 0,
        }
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Sequential little-endian reader over a [`FileScanner`].
pub struct ScanCursor<'a> {
    scanner: &'a FileScanner,
    window: Cow<'a, [u8]>,
    window_start: u64,
    pos: usize,
}

impl<'a> ScanCursor<'a> {
    /// Absolute file position of the next byte
    pub fn position(&self) -> u64 {
        self.window_start + self.pos as u64
    }

    pub fn set_pos(&mut self, offset: u64) {
        let window_end = self.window_start + self.window.len() as u64;
        if offset >= self.window_start && offset <= window_end {
            self.pos = (offset - self.window_start) as usize;
        } else {
            self.window = Cow::Borrowed(&[]);
            self.window_start = offset;
            self.pos = 0;
        }
    }

    fn remaining_in_window(&self) -> usize {
        self.window.len() - self.pos
    }

    /// Make at least `n` bytes available at the current position.
    fn fill(&mut self, n: usize) -> Result<()> {
        if self.remaining_in_window() >= n {
            return Ok(());
        }

        let start = self.position();
        let available = self.scanner.len().saturating_sub(start);
        if n as u64 > available {
            return Err(IndexError::UnexpectedEof {
                offset: start,
                wanted: n,
                len: self.scanner.len(),
            });
        }

        let want = if self.scanner.is_memory_mapped() {
            available
        } else {
            (n.max(READ_BLOCK) as u64).min(available)
        };

        self.window = self.scanner.read_at(start, want as usize)?;
        self.window_start = start;
        self.pos = 0;
        Ok(())
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        if n > READ_BLOCK && !self.scanner.is_memory_mapped() {
            // large reads bypass the window
            let start = self.position();
            let bytes = self.scanner.read_at(start, n)?.into_owned();
            self.set_pos(start + n as u64);
            return Ok(bytes);
        }
        self.fill(n)?;
        let bytes = self.window[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.fill(N)?;
        let mut buf = [0u8; N];
        buf.copy_from_slice(&self.window[self.pos..self.pos + N]);
        self.pos += N;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    /// Little-endian unsigned value stored in `width` bytes (1..=8).
    pub fn read_sized(&mut self, width: u8) -> Result<u64> {
        debug_assert!((1..=8).contains(&width));
        let width = width as usize;
        self.fill(width)?;
        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(&self.window[self.pos..self.pos + width]);
        self.pos += width;
        Ok(u64::from_le_bytes(buf))
    }

    /// Variable-length encoded number
    pub fn read_number(&mut self) -> Result<u64> {
        let available = self.scanner.len().saturating_sub(self.position());
        let wanted = (MAX_VARINT_LEN as u64).min(available) as usize;
        self.fill(wanted)?;
        let (value, consumed) = varint::decode(&self.window[self.pos..])?;
        self.pos += consumed;
        Ok(value)
    }
}
