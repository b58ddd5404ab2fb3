//! One physical chunk file: header, frame chain, summary-metadata tail.
//!
//! A [`ChunkStream`] owns the [`ByteCursor`] for one `*.g2s.tif` file and
//! implements the two protocols of the container:
//!
//! - **Append** — each image becomes a frame (IFD, strip, padding, optional
//!   metadata) written in one forward pass; the previous frame's next-IFD
//!   pointer is patched in place to link the chain. Frames start and end on
//!   the alignment boundary, so every physical write stays aligned under
//!   direct I/O.
//! - **Parse** — the header is validated, the IFD chain walked into an
//!   offset cache, and the tail scanned for the summary-metadata section.
//!   Parsing is lenient against trailing truncation: the longest intact
//!   frame prefix is kept, trailing garbage ignored, and the chunk flagged
//!   partial. Parse never rewrites the file.

use std::path::Path;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::error::{FormatError, Result, StorageError};
use crate::format::ifd::next_ptr_pos;
use crate::format::{
    align_down, align_up, ChunkHeader, FrameLayout, ImageIfd, PixelFormat, TiffVariant,
    HEADER_CAPACITY,
};
use crate::io::ByteCursor;

// =============================================================================
// ChunkStream
// =============================================================================

/// Largest alignment boundary considered when classifying trailing bytes.
const MAX_TAIL_BOUNDARY: u64 = 64 * 1024;

/// Identity of the most recently written (or last parsed) frame IFD,
/// kept so the next append can patch its next-IFD pointer.
#[derive(Debug, Clone, Copy)]
struct LastIfd {
    offset: u64,
    tag_count: usize,
}

/// One chunk file of a dataset.
pub struct ChunkStream {
    cursor: ByteCursor,
    header: ChunkHeader,
    /// On-disk size of the header region; the first frame starts here.
    header_region: u64,
    /// Absolute offsets of every intact frame IFD, in append order.
    ifd_offsets: Vec<u64>,
    last_ifd: Option<LastIfd>,
    write_mode: bool,
    partial: bool,
    /// Pixel format recovered from the first frame (or set by the writer).
    pixel_format: Option<PixelFormat>,
    summary_meta: Option<Bytes>,
    summary_written: bool,
    images_since_flush: u32,
}

impl ChunkStream {
    // -------------------------------------------------------------------------
    // Open / create
    // -------------------------------------------------------------------------

    /// Create a new chunk file and write its blank header.
    pub async fn create(
        path: &Path,
        variant: TiffVariant,
        chunk_index: u32,
        direct_io: bool,
        sector_override: Option<u32>,
    ) -> Result<Self> {
        let cursor = ByteCursor::create(path, direct_io, sector_override).await?;
        let align = cursor.alignment();
        let header_region = align_up(HEADER_CAPACITY as u64, align);
        let header = ChunkHeader::new(variant, header_region, chunk_index);

        let mut stream = ChunkStream {
            cursor,
            header,
            header_region,
            ifd_offsets: Vec::new(),
            last_ifd: None,
            write_mode: true,
            partial: false,
            pixel_format: None,
            summary_meta: None,
            summary_written: false,
            images_since_flush: 0,
        };
        stream.rewrite_header().await?;
        stream.cursor.seek(header_region);

        debug!(path = %path.display(), chunk_index, "created chunk");
        Ok(stream)
    }

    /// Open an existing chunk file and validate its header.
    ///
    /// Call [`parse`](Self::parse) afterwards to walk the frame chain.
    pub async fn open_existing(
        path: &Path,
        direct_io: bool,
        sector_override: Option<u32>,
    ) -> Result<Self> {
        let cursor = ByteCursor::open(path, direct_io, sector_override).await?;
        let bytes = cursor.fetch_up_to(0, HEADER_CAPACITY).await?;
        let header = ChunkHeader::parse(&bytes)?;
        // The on-disk header region is whatever the writer's alignment made
        // it; the first-IFD offset records it exactly.
        let header_region = header.first_ifd_offset;

        Ok(ChunkStream {
            cursor,
            header,
            header_region,
            ifd_offsets: Vec::new(),
            last_ifd: None,
            write_mode: false,
            partial: false,
            pixel_format: None,
            summary_meta: None,
            summary_written: false,
            images_since_flush: 0,
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// The parsed or to-be-written chunk header.
    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    /// Container variant of this chunk.
    pub fn variant(&self) -> TiffVariant {
        self.header.variant
    }

    /// Zero-based chunk index within the dataset.
    pub fn chunk_index(&self) -> u32 {
        self.header.chunk_index
    }

    /// Number of intact frames in this chunk.
    pub fn image_count(&self) -> usize {
        self.ifd_offsets.len()
    }

    /// Whether parse recovered this chunk from a truncated state.
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// Pixel format of the frames, when known.
    pub fn pixel_format(&self) -> Option<PixelFormat> {
        self.pixel_format
    }

    /// Summary metadata recovered from the tail, if present.
    pub fn summary_metadata(&self) -> Option<&Bytes> {
        self.summary_meta.as_ref()
    }

    /// The alignment boundary of this chunk's frames.
    pub fn alignment(&self) -> u64 {
        self.cursor.alignment()
    }

    /// Absolute offset of the frame IFD at `index`.
    pub fn ifd_offset(&self, index: usize) -> Option<u64> {
        self.ifd_offsets.get(index).copied()
    }

    // -------------------------------------------------------------------------
    // Header patches
    // -------------------------------------------------------------------------

    /// Write the dataset UUID into the header.
    ///
    /// Legal only before the first image is committed; idempotent.
    pub async fn write_uid(&mut self, uuid: [u8; 16]) -> Result<()> {
        self.require_patchable("dataset UUID")?;
        if self.header.uuid == uuid {
            return Ok(());
        }
        self.header.uuid = uuid;
        self.rewrite_header().await
    }

    /// Write the shape vector and chunk size into the header.
    ///
    /// Legal only before the first image is committed; idempotent.
    pub async fn write_shape(&mut self, shape: &[u32], chunk_size: u32) -> Result<()> {
        self.require_patchable("shape")?;
        if shape.len() > self.variant().max_axes() {
            return Err(StorageError::InvalidArgument(format!(
                "shape with {} axes exceeds the header capacity of {}",
                shape.len(),
                self.variant().max_axes()
            )));
        }
        if self.header.shape == shape && self.header.chunk_size == chunk_size {
            return Ok(());
        }
        self.header.shape = shape.to_vec();
        self.header.chunk_size = chunk_size;
        self.rewrite_header().await
    }

    fn require_patchable(&self, what: &str) -> Result<()> {
        if !self.write_mode {
            return Err(StorageError::InvalidState(format!(
                "cannot set {} on a read-mode chunk",
                what
            )));
        }
        if !self.ifd_offsets.is_empty() {
            return Err(StorageError::InvalidState(format!(
                "cannot set {} after the first image",
                what
            )));
        }
        Ok(())
    }

    /// Rewrite the full header region in place.
    async fn rewrite_header(&mut self) -> Result<()> {
        let encoded = self.header.encode();
        let mut region = BytesMut::with_capacity(self.header_region as usize);
        region.put_slice(&encoded);
        region.resize(self.header_region as usize, 0);
        self.cursor.commit_at(0, region.freeze()).await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Append protocol
    // -------------------------------------------------------------------------

    /// Append one image frame; returns the new frame's IFD offset.
    ///
    /// `meta` is the per-image metadata string; `None` or empty writes the
    /// 8-tag IFD. `width`/`height`/`pixel_format` come from the dataset,
    /// which has already validated `pixels.len()` against them.
    pub async fn append_image(
        &mut self,
        pixels: &[u8],
        meta: Option<&str>,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        flush_interval: u32,
    ) -> Result<u64> {
        if !self.write_mode {
            return Err(StorageError::InvalidState(
                "cannot append to a read-mode chunk".to_string(),
            ));
        }
        if self.summary_written {
            return Err(StorageError::InvalidState(
                "cannot append after the summary metadata section".to_string(),
            ));
        }

        let align = self.alignment();
        let meta_str = meta.filter(|m| !m.is_empty());
        let meta_len = meta_str.map_or(0, |m| m.len());
        let layout = FrameLayout::compute(self.variant(), pixels.len(), meta_len, align);

        let frame_start = self.cursor.write_pos();
        if frame_start + layout.total() as u64 > self.variant().max_container_size() {
            return Err(StorageError::OutOfResources(format!(
                "appending {} bytes at offset {} would exceed the container limit",
                layout.total(),
                frame_start
            )));
        }

        // Link the chain: patch the previous frame's next-IFD pointer.
        if let Some(prev) = self.last_ifd {
            self.patch_next_ifd(prev, frame_start).await?;
        }

        // Compose the whole frame and commit it in one forward pass.
        let mut frame = BytesMut::with_capacity(layout.total());
        frame.put_slice(&layout.encode_ifd(frame_start, width, height, pixel_format));
        frame.put_slice(pixels);
        frame.put_bytes(0, layout.strip_pad);
        if let Some(m) = meta_str {
            frame.put_slice(m.as_bytes());
            frame.put_u8(0);
            frame.put_bytes(0, layout.meta_pad);
        }
        debug_assert_eq!(frame.len(), layout.total());
        self.cursor.commit(frame.freeze()).await?;

        self.ifd_offsets.push(frame_start);
        self.last_ifd = Some(LastIfd {
            offset: frame_start,
            tag_count: layout.tag_count(),
        });
        if self.pixel_format.is_none() {
            self.pixel_format = Some(pixel_format);
        }

        self.images_since_flush += 1;
        if flush_interval > 0 && self.images_since_flush % flush_interval == 0 {
            self.cursor.flush().await?;
        }

        Ok(frame_start)
    }

    /// Patch a frame's next-IFD pointer to `next` in place.
    ///
    /// Under direct I/O this is a read-modify-write of the enclosing sector
    /// extent so the physical transfer stays aligned.
    async fn patch_next_ifd(&mut self, prev: LastIfd, next: u64) -> Result<()> {
        let variant = self.variant();
        let ptr_pos = prev.offset + next_ptr_pos(variant, prev.tag_count) as u64;
        let ptr_len = variant.ifd_next_size();

        let encoded = match variant {
            TiffVariant::Classic => Bytes::copy_from_slice(&(next as u32).to_le_bytes()),
            TiffVariant::Big => Bytes::copy_from_slice(&next.to_le_bytes()),
        };

        match self.cursor.mode().sector() {
            None => {
                self.cursor.commit_at(ptr_pos, encoded).await?;
            }
            Some(sector) => {
                let sector = sector as u64;
                let start = align_down(ptr_pos, sector);
                let end = align_up(ptr_pos + ptr_len as u64, sector);
                let span = (end - start) as usize;

                let extent = self.cursor.fetch_at(start, span).await?;
                let mut patched = BytesMut::from(&extent[..]);
                let rel = (ptr_pos - start) as usize;
                patched[rel..rel + ptr_len].copy_from_slice(&encoded);
                self.cursor.commit_at(start, patched.freeze()).await?;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Summary metadata tail
    // -------------------------------------------------------------------------

    /// Append the dataset summary metadata section at the tail.
    ///
    /// Only the first chunk carries this section, and only once, during the
    /// lifetime that created the dataset.
    pub async fn append_summary_metadata(&mut self, meta: &[u8]) -> Result<()> {
        if !self.write_mode {
            return Err(StorageError::InvalidState(
                "summary metadata can only be written by the creating lifetime".to_string(),
            ));
        }
        if self.chunk_index() != 0 {
            return Err(StorageError::InvalidState(
                "summary metadata belongs to the first chunk".to_string(),
            ));
        }
        if self.summary_written {
            return Err(StorageError::InvalidState(
                "summary metadata already written".to_string(),
            ));
        }

        let align = self.alignment();
        let section_len = align_up(8 + meta.len() as u64, align) as usize;
        let mut section = BytesMut::with_capacity(section_len);
        section.put_u64_le(meta.len() as u64);
        section.put_slice(meta);
        section.resize(section_len, 0);

        self.cursor.commit(section.freeze()).await?;
        self.summary_meta = Some(Bytes::copy_from_slice(meta));
        self.summary_written = true;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Parse protocol
    // -------------------------------------------------------------------------

    /// Walk the frame chain and scan the tail.
    ///
    /// Recovers the offset cache, the pixel format, the summary metadata and
    /// the write position. Trailing truncation is accepted and flagged via
    /// [`is_partial`](Self::is_partial); structural violations inside the
    /// intact region are errors.
    pub async fn parse(&mut self) -> Result<()> {
        let variant = self.variant();
        let align = self.alignment();
        let file_size = self.cursor.file_size().await?;
        let max_ifd_len = variant.ifd_len(9);

        self.ifd_offsets.clear();
        self.partial = false;
        // The first frame sits wherever the writing cursor's alignment put
        // it, which may differ from this reader's alignment boundary.
        let mut frame_end = self.header.first_ifd_offset;

        let mut offset = self.header.first_ifd_offset;
        loop {
            if offset == frame_end && offset == file_size {
                // Clean end of chain at end of file.
                break;
            }
            if offset + variant.ifd_count_size() as u64 > file_size {
                self.partial = true;
                break;
            }

            let bytes = self.cursor.fetch_up_to(offset, max_ifd_len).await?;
            if bytes.len() < variant.ifd_count_size() {
                self.partial = true;
                break;
            }

            let tag_count = ImageIfd::read_tag_count(&bytes, variant) as usize;
            if tag_count != 8 && tag_count != 9 {
                // A torn IFD write at the tail; anything else in its place
                // would have failed the chain checks of the previous frame.
                self.partial = true;
                break;
            }
            let ifd_len = variant.ifd_len(tag_count);
            if bytes.len() < ifd_len {
                self.partial = true;
                break;
            }

            // Violations inside a fully-present IFD are corruption, not
            // truncation; only short reads above fall back to recovery.
            let ifd = ImageIfd::parse(&bytes, variant, offset)?;

            // The frame payload must be fully on disk.
            if ifd.frame_end(align) > file_size {
                self.partial = true;
                break;
            }

            if self.pixel_format.is_none() {
                self.pixel_format = Some(ifd.pixel_format);
            }

            self.ifd_offsets.push(offset);
            self.last_ifd = Some(LastIfd {
                offset,
                tag_count: ifd.tag_count,
            });
            frame_end = ifd.frame_end(align);

            match ifd.next_ifd {
                0 => break,
                next if next <= offset => {
                    return Err(FormatError::NonMonotonicIfd {
                        prev: offset,
                        next,
                    }
                    .into());
                }
                next if next >= file_size => {
                    // Chain patched but the frame never landed.
                    self.partial = true;
                    break;
                }
                next => offset = next,
            }
        }

        // Tail scan: the summary-metadata section, benign alignment
        // padding, or torn garbage.
        if !self.partial && file_size > frame_end {
            match self.scan_summary_tail(frame_end, file_size).await? {
                Some(meta) => {
                    self.summary_meta = Some(meta);
                    // The tail section seals the chunk; further appends
                    // would overwrite it.
                    self.summary_written = true;
                }
                None => {
                    if !self.tail_is_zero_padding(frame_end, file_size).await? {
                        self.partial = true;
                    }
                }
            }
        }

        if self.partial {
            warn!(
                path = %self.cursor.path().display(),
                recovered = self.ifd_offsets.len(),
                "chunk recovered from truncated state"
            );
        }

        self.cursor.seek(frame_end);
        debug!(
            path = %self.cursor.path().display(),
            frames = self.ifd_offsets.len(),
            partial = self.partial,
            "parsed chunk"
        );
        Ok(())
    }

    /// Look for the summary-metadata section after the last frame.
    ///
    /// The section was written at the *writer's* alignment boundary, which
    /// may be coarser than this reader's (a chunk written under direct I/O
    /// and read buffered). Candidate start offsets are therefore the frame
    /// end under our own boundary plus its round-ups to the common sector
    /// sizes; padding bytes between them are zero and never parse as a
    /// section, since a section's length prefix is nonzero.
    async fn scan_summary_tail(&self, frame_end: u64, file_size: u64) -> Result<Option<Bytes>> {
        let mut candidates: Vec<(u64, u64)> = vec![(frame_end, self.alignment())];
        let mut boundary = 512u64;
        while boundary <= MAX_TAIL_BOUNDARY {
            let start = align_up(frame_end, boundary);
            if start + 8 <= file_size && candidates.iter().all(|&(s, _)| s != start) {
                candidates.push((start, boundary));
            }
            boundary <<= 1;
        }

        for (start, boundary) in candidates {
            if let Some(meta) = self.try_summary_at(start, file_size, boundary).await? {
                return Ok(Some(meta));
            }
        }
        Ok(None)
    }

    /// Parse a summary-metadata section at `start`, padded to `boundary`.
    ///
    /// Well-formed means: nonzero length prefix, payload inside the file,
    /// and nothing after it except sub-boundary padding.
    async fn try_summary_at(
        &self,
        start: u64,
        file_size: u64,
        boundary: u64,
    ) -> Result<Option<Bytes>> {
        let prefix = self.cursor.fetch_up_to(start, 8).await?;
        if prefix.len() < 8 {
            return Ok(None);
        }
        let meta_len = u64::from_le_bytes(prefix[..8].try_into().unwrap());
        if meta_len == 0 {
            return Ok(None);
        }
        let payload_end = match start.checked_add(8).and_then(|p| p.checked_add(meta_len)) {
            Some(end) => end,
            None => return Ok(None),
        };
        if payload_end > file_size || file_size - payload_end >= boundary {
            return Ok(None);
        }
        let meta = self.cursor.fetch_at(start + 8, meta_len as usize).await?;
        Ok(Some(meta))
    }

    /// Whether the trailing bytes are nothing but alignment padding.
    ///
    /// A chunk written under a coarser alignment than the reader's carries
    /// zero padding after its last frame; that is not a torn write.
    async fn tail_is_zero_padding(&self, frame_end: u64, file_size: u64) -> Result<bool> {
        if file_size - frame_end > MAX_TAIL_BOUNDARY {
            return Ok(false);
        }
        let tail = self
            .cursor
            .fetch_up_to(frame_end, (file_size - frame_end) as usize)
            .await?;
        Ok(tail.iter().all(|&b| b == 0))
    }

    // -------------------------------------------------------------------------
    // Frame reads
    // -------------------------------------------------------------------------

    /// Load and validate the frame IFD at `index` in the offset cache.
    pub async fn load_ifd(&self, index: usize) -> Result<ImageIfd> {
        let offset = self.ifd_offsets.get(index).copied().ok_or_else(|| {
            StorageError::NotFound(format!("image {} not present in chunk", index))
        })?;

        let variant = self.variant();
        let bytes = self
            .cursor
            .fetch_up_to(offset, variant.ifd_len(9))
            .await?;
        if bytes.len() < variant.ifd_count_size() {
            return Err(FormatError::TruncatedHeader {
                required: variant.ifd_count_size(),
                actual: bytes.len(),
            }
            .into());
        }
        let tag_count = ImageIfd::read_tag_count(&bytes, variant) as usize;
        if tag_count != 8 && tag_count != 9 || bytes.len() < variant.ifd_len(tag_count) {
            return Err(FormatError::TagLayout {
                offset,
                detail: "frame IFD no longer intact".to_string(),
            }
            .into());
        }
        Ok(ImageIfd::parse(&bytes, variant, offset)?)
    }

    /// Read the pixel strip of a frame.
    pub async fn read_strip(&self, ifd: &ImageIfd) -> Result<Bytes> {
        Ok(self
            .cursor
            .fetch_at(ifd.strip_offset, ifd.strip_len as usize)
            .await?)
    }

    /// Read the per-image metadata string of a frame; empty when absent.
    pub async fn read_image_metadata(&self, ifd: &ImageIfd) -> Result<String> {
        if ifd.meta_len == 0 {
            return Ok(String::new());
        }
        let raw = self
            .cursor
            .fetch_at(ifd.meta_offset, ifd.meta_len as usize)
            .await?;
        // Stored length includes the NUL terminator.
        let text = raw.strip_suffix(&[0u8]).unwrap_or(&raw);
        Ok(String::from_utf8_lossy(text).into_owned())
    }

    // -------------------------------------------------------------------------
    // Durability
    // -------------------------------------------------------------------------

    /// Flush written data to the device.
    pub async fn flush(&self) -> Result<()> {
        Ok(self.cursor.flush().await?)
    }
}

impl std::fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStream")
            .field("path", &self.cursor.path())
            .field("chunk_index", &self.header.chunk_index)
            .field("frames", &self.ifd_offsets.len())
            .field("write_mode", &self.write_mode)
            .field("partial", &self.partial)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
