//! Positioned, optionally alignment-constrained file access.
//!
//! [`ByteCursor`] wraps a file handle with two independent positions — a
//! read cursor and a write cursor — that survive interleaved fetch/commit
//! sequences. It supports two modes:
//!
//! - **Buffered**: ordinary OS file I/O; the alignment boundary is 2 bytes
//!   (TIFF word alignment).
//! - **Direct**: the file is opened with `O_DIRECT`; every physical
//!   transfer's file offset, length and memory address are multiples of the
//!   device sector size. Memory alignment is guaranteed internally by
//!   staging transfers through [`AlignedBuf`]; offset and length alignment
//!   of *writes* is the caller's responsibility and violations are rejected.
//!   Reads of arbitrary extents are served by fetching the enclosing
//!   sector-aligned extent and slicing.
//!
//! All I/O is positioned (`pread`/`pwrite`) and runs on the blocking thread
//! pool; tokio's buffered file wrapper is bypassed because it would copy
//! direct-I/O transfers through an unaligned intermediate buffer.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::IoError;

// =============================================================================
// Constants
// =============================================================================

/// Alignment boundary in buffered mode (TIFF word alignment).
pub const BUFFERED_ALIGNMENT: u64 = 2;

/// Fallback sector size when the device reports nothing usable.
const FALLBACK_SECTOR_SIZE: u32 = 4096;

/// Staging buffer capacity for large direct-mode transfers.
const STAGING_CAPACITY: usize = 1024 * 1024;

// =============================================================================
// AlignedBuf
// =============================================================================

/// Heap buffer whose address is aligned to a sector boundary.
///
/// Required for direct I/O: the kernel rejects transfers whose memory
/// address is not sector-aligned. The buffer is zero-initialized.
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

impl AlignedBuf {
    /// Allocate a zeroed buffer of `len` bytes aligned to `align`.
    ///
    /// `align` must be a power of two and `len` non-zero.
    pub fn new(len: usize, align: usize) -> Self {
        assert!(len > 0 && align.is_power_of_two());
        let layout = Layout::from_size_align(len, align).expect("invalid aligned layout");
        // SAFETY: layout has non-zero size; allocation failure aborts below.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| std::alloc::handle_alloc_error(layout));
        AlignedBuf { ptr, len, layout }
    }

    /// The buffer as an immutable slice.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len bytes for the lifetime of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The buffer as a mutable slice.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for len bytes and uniquely borrowed.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Buffer length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer is empty (never true for a constructed buffer).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        // SAFETY: allocated with this exact layout in new().
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

// SAFETY: the buffer owns its allocation exclusively.
unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

// =============================================================================
// CursorMode
// =============================================================================

/// I/O mode of a [`ByteCursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    /// Standard OS-buffered file I/O.
    Buffered,
    /// OS-unbuffered I/O; all physical transfers aligned to `sector` bytes.
    Direct { sector: u32 },
}

impl CursorMode {
    /// The alignment boundary for this mode.
    #[inline]
    pub fn alignment(self) -> u64 {
        match self {
            CursorMode::Buffered => BUFFERED_ALIGNMENT,
            CursorMode::Direct { sector } => sector as u64,
        }
    }

    /// The sector size in direct mode.
    #[inline]
    pub fn sector(self) -> Option<u32> {
        match self {
            CursorMode::Buffered => None,
            CursorMode::Direct { sector } => Some(sector),
        }
    }
}

// =============================================================================
// ByteCursor
// =============================================================================

/// Positioned read/write access to one file with separate read and write
/// cursors.
pub struct ByteCursor {
    file: Arc<File>,
    path: PathBuf,
    mode: CursorMode,
    read_pos: u64,
    write_pos: u64,
}

impl ByteCursor {
    /// Create (or truncate) a file for writing and reading.
    pub async fn create(
        path: &Path,
        direct_io: bool,
        sector_override: Option<u32>,
    ) -> Result<Self, IoError> {
        Self::open_inner(path, true, direct_io, sector_override).await
    }

    /// Open an existing file for reading and in-place patching.
    pub async fn open(
        path: &Path,
        direct_io: bool,
        sector_override: Option<u32>,
    ) -> Result<Self, IoError> {
        Self::open_inner(path, false, direct_io, sector_override).await
    }

    async fn open_inner(
        path: &Path,
        create: bool,
        direct_io: bool,
        sector_override: Option<u32>,
    ) -> Result<Self, IoError> {
        let path_buf = path.to_path_buf();
        let open_path = path_buf.clone();
        let file = tokio::task::spawn_blocking(move || {
            let mut options = std::fs::OpenOptions::new();
            options.read(true).write(true);
            if create {
                options.create(true).truncate(true);
            }
            #[cfg(target_os = "linux")]
            if direct_io {
                use std::os::unix::fs::OpenOptionsExt;
                options.custom_flags(libc::O_DIRECT);
            }
            options.open(&open_path)
        })
        .await
        .map_err(join_to_io)
        .and_then(|r| r)
        .map_err(|source| IoError::OpenFailed {
            path: path_buf.clone(),
            source,
        })?;

        let mode = if direct_io {
            let sector = match sector_override {
                Some(sector) => sector,
                None => probe_sector_size(&file),
            };
            CursorMode::Direct { sector }
        } else {
            CursorMode::Buffered
        };

        Ok(ByteCursor {
            file: Arc::new(file),
            path: path_buf,
            mode,
            read_pos: 0,
            write_pos: 0,
        })
    }

    /// The cursor's I/O mode.
    #[inline]
    pub fn mode(&self) -> CursorMode {
        self.mode
    }

    /// The alignment boundary every frame honors: sector size in direct
    /// mode, 2 otherwise.
    #[inline]
    pub fn alignment(&self) -> u64 {
        self.mode.alignment()
    }

    /// The file path this cursor operates on.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current read cursor.
    #[inline]
    pub fn read_pos(&self) -> u64 {
        self.read_pos
    }

    /// Current write cursor.
    #[inline]
    pub fn write_pos(&self) -> u64 {
        self.write_pos
    }

    /// Move the read cursor.
    #[inline]
    pub fn seek_read(&mut self, pos: u64) {
        self.read_pos = pos;
    }

    /// Move the write cursor.
    ///
    /// Positions past end-of-file are legal; the following commit fills the
    /// gap.
    #[inline]
    pub fn seek_write(&mut self, pos: u64) {
        self.write_pos = pos;
    }

    /// Move both cursors to the same position.
    #[inline]
    pub fn seek(&mut self, pos: u64) {
        self.read_pos = pos;
        self.write_pos = pos;
    }

    /// Current file length in bytes.
    pub async fn file_size(&self) -> Result<u64, IoError> {
        let file = Arc::clone(&self.file);
        let offset = self.read_pos;
        tokio::task::spawn_blocking(move || file.metadata().map(|m| m.len()))
            .await
            .map_err(join_to_io)
            .and_then(|r| r)
            .map_err(|source| IoError::ReadFailed {
                offset,
                len: 0,
                source,
            })
    }

    // -------------------------------------------------------------------------
    // Fetch (read path)
    // -------------------------------------------------------------------------

    /// Read exactly `len` bytes at the read cursor, advancing it.
    ///
    /// Fails with `ReadFailed` when the extent runs past end-of-file.
    pub async fn fetch(&mut self, len: usize) -> Result<Bytes, IoError> {
        let data = self.fetch_at(self.read_pos, len).await?;
        self.read_pos += len as u64;
        Ok(data)
    }

    /// Read exactly `len` bytes at an explicit offset; cursors unchanged.
    ///
    /// In direct mode the enclosing sector-aligned extent is transferred and
    /// sliced, so the physical read stays aligned for any `offset`/`len`.
    pub async fn fetch_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let data = self.fetch_up_to(offset, len).await?;
        if data.len() < len {
            return Err(IoError::ReadFailed {
                offset,
                len,
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("short read: {} of {} bytes", data.len(), len),
                ),
            });
        }
        Ok(data)
    }

    /// Read up to `len` bytes at an explicit offset, stopping early at
    /// end-of-file without error. Used by recovery scans.
    pub async fn fetch_up_to(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let file = Arc::clone(&self.file);
        let mode = self.mode;

        let result = tokio::task::spawn_blocking(move || match mode {
            CursorMode::Buffered => read_full_at(&file, offset, len),
            CursorMode::Direct { sector } => {
                let sector = sector as u64;
                let start = offset & !(sector - 1);
                let end = (offset + len as u64 + sector - 1) & !(sector - 1);
                let span = (end - start) as usize;

                let mut staged = AlignedBuf::new(span, sector as usize);
                let got = read_full_at_into(&file, start, staged.as_mut_slice())?;

                let lead = (offset - start) as usize;
                if got <= lead {
                    return Ok(Vec::new());
                }
                let avail = (got - lead).min(len);
                Ok(staged.as_slice()[lead..lead + avail].to_vec())
            }
        })
        .await
        .map_err(join_to_io)
        .and_then(|r| r)
        .map_err(|source| IoError::ReadFailed { offset, len, source })?;

        Ok(Bytes::from(result))
    }

    // -------------------------------------------------------------------------
    // Commit (write path)
    // -------------------------------------------------------------------------

    /// Write `data` at the write cursor, advancing it.
    ///
    /// In direct mode both the write cursor and `data.len()` must be
    /// multiples of the sector size; callers supply padding to get there.
    pub async fn commit(&mut self, data: Bytes) -> Result<(), IoError> {
        let len = data.len();
        self.commit_at(self.write_pos, data).await?;
        self.write_pos += len as u64;
        Ok(())
    }

    /// Write `data` at an explicit offset; cursors unchanged.
    ///
    /// Used for in-place patches (previous-IFD pointer, header rewrite).
    /// The same alignment constraints as [`commit`](Self::commit) apply.
    pub async fn commit_at(&self, offset: u64, data: Bytes) -> Result<(), IoError> {
        if data.is_empty() {
            return Ok(());
        }
        if let CursorMode::Direct { sector } = self.mode {
            let s = sector as u64;
            if offset % s != 0 || data.len() as u64 % s != 0 {
                return Err(IoError::AlignmentViolation {
                    offset,
                    len: data.len(),
                    sector,
                });
            }
        }

        let file = Arc::clone(&self.file);
        let mode = self.mode;
        let len = data.len();

        tokio::task::spawn_blocking(move || match mode {
            CursorMode::Buffered => file.write_all_at(&data, offset),
            CursorMode::Direct { sector } => {
                // Stage through an aligned buffer in bounded pieces so large
                // strips do not double peak memory.
                let sector = sector as usize;
                let piece = STAGING_CAPACITY.max(sector) / sector * sector;
                let mut staged = AlignedBuf::new(piece.min(data.len()), sector);

                let mut written = 0usize;
                while written < data.len() {
                    let n = piece.min(data.len() - written);
                    staged.as_mut_slice()[..n].copy_from_slice(&data[written..written + n]);
                    file.write_all_at(&staged.as_slice()[..n], offset + written as u64)?;
                    written += n;
                }
                Ok(())
            }
        })
        .await
        .map_err(join_to_io)
        .and_then(|r| r)
        .map_err(|source| IoError::WriteFailed { offset, len, source })
    }

    /// Flush written data to the device.
    pub async fn flush(&self) -> Result<(), IoError> {
        let file = Arc::clone(&self.file);
        let offset = self.write_pos;
        tokio::task::spawn_blocking(move || file.sync_data())
            .await
            .map_err(join_to_io)
            .and_then(|r| r)
            .map_err(|source| IoError::WriteFailed {
                offset,
                len: 0,
                source,
            })
    }
}

impl std::fmt::Debug for ByteCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteCursor")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("read_pos", &self.read_pos)
            .field("write_pos", &self.write_pos)
            .finish()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Probe the device sector size for a file, falling back to 4096.
fn probe_sector_size(file: &File) -> u32 {
    match file.metadata() {
        Ok(meta) => {
            let blksize = meta.blksize();
            if blksize >= 512 && blksize.is_power_of_two() && blksize <= 1024 * 1024 {
                blksize as u32
            } else {
                FALLBACK_SECTOR_SIZE
            }
        }
        Err(_) => FALLBACK_SECTOR_SIZE,
    }
}

/// Read until `len` bytes or end-of-file; returns the bytes read.
fn read_full_at(file: &File, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let filled = read_full_at_into(file, offset, &mut buf)?;
    buf.truncate(filled);
    Ok(buf)
}

/// Read into `buf` until full or end-of-file; returns bytes filled.
fn read_full_at_into(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn join_to_io(err: tokio::task::JoinError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err)
}

// =============================================================================
// Tests
// =============================================================================
