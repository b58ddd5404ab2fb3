//! Image frame IFD encoding, decoding and layout arithmetic.
//!
//! Each image frame in a chunk is laid out as:
//!
//! ```text
//! frame start (aligned)
//!   IFD:      entry count | canonical tags (8 or 9) | next-IFD pointer
//!   strip:    uncompressed pixel bytes
//!   padding:  to the alignment boundary
//!   metadata: UTF-8 string + NUL  (only when present)
//!   padding:  to the alignment boundary (only when metadata present)
//! ```
//!
//! [`FrameLayout`] computes every offset and size in that picture once, so
//! the encoder, the append protocol and the tests all agree on arithmetic.
//! [`ImageIfd`] is the decoded, validated form of one frame's IFD.

use crate::error::FormatError;
use crate::format::tags::{FieldType, TiffTag, PHOTOMETRIC_MINISBLACK};
use crate::format::{align_up, PixelFormat, TiffVariant};

// =============================================================================
// FrameLayout
// =============================================================================

/// Byte layout of one image frame under a given alignment boundary.
///
/// All offsets are relative to the frame start, which is itself aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    /// Container variant the frame is encoded for.
    pub variant: TiffVariant,

    /// IFD byte length: count field + entries + next pointer.
    pub ifd_len: usize,

    /// Pixel strip byte length.
    pub strip_len: usize,

    /// Zero padding after the strip.
    pub strip_pad: usize,

    /// Stored metadata length including the NUL terminator; 0 when absent.
    pub meta_stored: usize,

    /// Zero padding after the metadata.
    pub meta_pad: usize,
}

impl FrameLayout {
    /// Compute the layout for a frame.
    ///
    /// `meta_len` is the raw metadata string length, without the NUL
    /// terminator; 0 means the frame carries no metadata and no 9th tag.
    /// `align` is the alignment boundary (sector size under direct I/O,
    /// 2 otherwise) and must be a power of two.
    pub fn compute(variant: TiffVariant, pixel_len: usize, meta_len: usize, align: u64) -> Self {
        let tag_count = if meta_len > 0 { 9 } else { 8 };
        let ifd_len = variant.ifd_len(tag_count);

        let strip_end = (ifd_len + pixel_len) as u64;
        let strip_pad = (align_up(strip_end, align) - strip_end) as usize;

        let (meta_stored, meta_pad) = if meta_len > 0 {
            let stored = meta_len + 1;
            let meta_end = strip_end + strip_pad as u64 + stored as u64;
            (stored, (align_up(meta_end, align) - meta_end) as usize)
        } else {
            (0, 0)
        };

        FrameLayout {
            variant,
            ifd_len,
            strip_len: pixel_len,
            strip_pad,
            meta_stored,
            meta_pad,
        }
    }

    /// Number of IFD entries: 8 canonical, 9 with metadata.
    #[inline]
    pub const fn tag_count(&self) -> usize {
        if self.meta_stored > 0 {
            9
        } else {
            8
        }
    }

    /// Total frame byte length; a multiple of the alignment boundary.
    #[inline]
    pub const fn total(&self) -> usize {
        self.ifd_len + self.strip_len + self.strip_pad + self.meta_stored + self.meta_pad
    }

    /// Absolute strip offset for a frame starting at `frame_start`.
    #[inline]
    pub const fn strip_offset(&self, frame_start: u64) -> u64 {
        frame_start + self.ifd_len as u64
    }

    /// Absolute metadata offset, if the frame carries metadata.
    #[inline]
    pub fn meta_offset(&self, frame_start: u64) -> Option<u64> {
        if self.meta_stored > 0 {
            Some(frame_start + (self.ifd_len + self.strip_len + self.strip_pad) as u64)
        } else {
            None
        }
    }

    /// Encode the frame IFD into `ifd_len` bytes.
    ///
    /// The next-IFD pointer is written as 0; it is patched in place by the
    /// following append.
    pub fn encode_ifd(
        &self,
        frame_start: u64,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
    ) -> Vec<u8> {
        let v = self.variant;
        let mut buf = vec![0u8; self.ifd_len];
        let mut pos = 0;

        // Entry count
        match v {
            TiffVariant::Classic => {
                buf[pos..pos + 2].copy_from_slice(&(self.tag_count() as u16).to_le_bytes());
            }
            TiffVariant::Big => {
                buf[pos..pos + 8].copy_from_slice(&(self.tag_count() as u64).to_le_bytes());
            }
        }
        pos += v.ifd_count_size();

        let offset_type = match v {
            TiffVariant::Classic => FieldType::Long,
            TiffVariant::Big => FieldType::Long8,
        };

        let mut put = |buf: &mut [u8], pos: &mut usize, tag: TiffTag, ftype: FieldType, count: u64, value: u64| {
            encode_entry(buf, *pos, v, tag, ftype, count, value);
            *pos += v.ifd_entry_size();
        };

        put(&mut buf, &mut pos, TiffTag::ImageWidth, FieldType::Long, 1, width as u64);
        put(&mut buf, &mut pos, TiffTag::ImageLength, FieldType::Long, 1, height as u64);
        put(
            &mut buf,
            &mut pos,
            TiffTag::BitsPerSample,
            FieldType::Short,
            1,
            pixel_format.bits_per_sample as u64,
        );
        put(&mut buf, &mut pos, TiffTag::Compression, FieldType::Short, 1, 1);
        put(
            &mut buf,
            &mut pos,
            TiffTag::PhotometricInterpretation,
            FieldType::Short,
            1,
            PHOTOMETRIC_MINISBLACK as u64,
        );
        put(
            &mut buf,
            &mut pos,
            TiffTag::StripOffsets,
            offset_type,
            1,
            self.strip_offset(frame_start),
        );
        put(
            &mut buf,
            &mut pos,
            TiffTag::SamplesPerPixel,
            FieldType::Short,
            1,
            pixel_format.samples_per_pixel as u64,
        );
        put(
            &mut buf,
            &mut pos,
            TiffTag::StripByteCounts,
            offset_type,
            1,
            self.strip_len as u64,
        );
        if let Some(meta_offset) = self.meta_offset(frame_start) {
            put(
                &mut buf,
                &mut pos,
                TiffTag::PrivateMetadata,
                FieldType::Ascii,
                self.meta_stored as u64,
                meta_offset,
            );
        }

        // Trailing next-IFD pointer stays zero.
        debug_assert_eq!(pos + v.ifd_next_size(), self.ifd_len);
        buf
    }
}

/// Byte position of the next-IFD pointer inside an IFD of `tag_count` tags.
#[inline]
pub fn next_ptr_pos(variant: TiffVariant, tag_count: usize) -> usize {
    variant.ifd_count_size() + tag_count * variant.ifd_entry_size()
}

/// Patch the next-IFD pointer of an already-encoded IFD in place.
pub fn patch_next_ifd(ifd: &mut [u8], variant: TiffVariant, tag_count: usize, next: u64) {
    let pos = next_ptr_pos(variant, tag_count);
    match variant {
        TiffVariant::Classic => {
            ifd[pos..pos + 4].copy_from_slice(&(next as u32).to_le_bytes());
        }
        TiffVariant::Big => {
            ifd[pos..pos + 8].copy_from_slice(&next.to_le_bytes());
        }
    }
}

fn encode_entry(
    buf: &mut [u8],
    pos: usize,
    variant: TiffVariant,
    tag: TiffTag,
    ftype: FieldType,
    count: u64,
    value: u64,
) {
    buf[pos..pos + 2].copy_from_slice(&tag.as_u16().to_le_bytes());
    buf[pos + 2..pos + 4].copy_from_slice(&ftype.as_u16().to_le_bytes());
    match variant {
        TiffVariant::Classic => {
            buf[pos + 4..pos + 8].copy_from_slice(&(count as u32).to_le_bytes());
            buf[pos + 8..pos + 12].copy_from_slice(&(value as u32).to_le_bytes());
        }
        TiffVariant::Big => {
            buf[pos + 4..pos + 12].copy_from_slice(&count.to_le_bytes());
            buf[pos + 12..pos + 20].copy_from_slice(&value.to_le_bytes());
        }
    }
}

// =============================================================================
// ImageIfd
// =============================================================================

/// Decoded, validated IFD of one image frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageIfd {
    /// Absolute offset of this IFD in the chunk file.
    pub offset: u64,

    /// Number of tags: 8, or 9 when the frame carries metadata.
    pub tag_count: usize,

    /// Image width in pixels.
    pub width: u32,

    /// Image height in pixels.
    pub height: u32,

    /// Pixel format recovered from BitsPerSample / SamplesPerPixel.
    pub pixel_format: PixelFormat,

    /// Absolute offset of the pixel strip.
    pub strip_offset: u64,

    /// Byte length of the pixel strip.
    pub strip_len: u64,

    /// Absolute metadata offset; 0 when the frame has no metadata.
    pub meta_offset: u64,

    /// Stored metadata length including NUL; 0 when absent.
    pub meta_len: u64,

    /// Absolute offset of the next IFD; 0 terminates the chain.
    pub next_ifd: u64,

    /// IFD byte length (count field + entries + next pointer).
    pub ifd_len: usize,
}

impl ImageIfd {
    /// Read the entry count from the first bytes of an IFD.
    ///
    /// The slice must hold at least [`TiffVariant::ifd_count_size`] bytes.
    pub fn read_tag_count(bytes: &[u8], variant: TiffVariant) -> u64 {
        match variant {
            TiffVariant::Classic => u16::from_le_bytes([bytes[0], bytes[1]]) as u64,
            TiffVariant::Big => u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
        }
    }

    /// Parse and validate an IFD located at absolute `offset`.
    ///
    /// `bytes` must span the full IFD (`variant.ifd_len(tag_count)` bytes);
    /// callers check availability first so truncation can be handled as
    /// partial-write recovery rather than corruption.
    ///
    /// # Errors
    /// - `TagLayout` on a tag-count, identity, order or type violation
    /// - `UnsupportedCompression` / `UnsupportedPixelFormat`
    /// - `BadStripSize` when StripByteCounts disagrees with the dimensions
    pub fn parse(bytes: &[u8], variant: TiffVariant, offset: u64) -> Result<Self, FormatError> {
        let tag_count = Self::read_tag_count(bytes, variant) as usize;
        if tag_count != 8 && tag_count != 9 {
            return Err(FormatError::TagLayout {
                offset,
                detail: format!("unexpected tag count {}", tag_count),
            });
        }

        let ifd_len = variant.ifd_len(tag_count);
        debug_assert!(bytes.len() >= ifd_len);

        let mut entries = [(0u16, 0u16, 0u64, 0u64); 9];
        for (i, entry) in entries.iter_mut().enumerate().take(tag_count) {
            let pos = variant.ifd_count_size() + i * variant.ifd_entry_size();
            *entry = decode_entry(bytes, pos, variant);
        }

        // Canonical identity and order
        for (i, canonical) in TiffTag::CANONICAL.iter().enumerate() {
            if entries[i].0 != canonical.as_u16() {
                return Err(FormatError::TagLayout {
                    offset,
                    detail: format!(
                        "tag {} at position {}, expected {}",
                        entries[i].0,
                        i,
                        canonical.as_u16()
                    ),
                });
            }
        }
        if tag_count == 9 && entries[8].0 != TiffTag::PrivateMetadata.as_u16() {
            return Err(FormatError::TagLayout {
                offset,
                detail: format!("tag {} at position 8, expected private metadata", entries[8].0),
            });
        }

        let compression = entries[3].3;
        if compression != 1 {
            return Err(FormatError::UnsupportedCompression(compression as u16));
        }

        let width = entries[0].3 as u32;
        let height = entries[1].3 as u32;
        let pixel_format = PixelFormat::new(entries[2].3 as u8, entries[6].3 as u8)?;

        let strip_offset = entries[5].3;
        let strip_len = entries[7].3;
        let computed = pixel_format.plane_bytes(width, height);
        if strip_len != computed {
            return Err(FormatError::BadStripSize {
                offset,
                stored: strip_len,
                computed,
            });
        }

        let (meta_offset, meta_len) = if tag_count == 9 {
            let (_, ftype, count, value) = entries[8];
            if FieldType::from_u16(ftype) != Some(FieldType::Ascii) || count == 0 {
                return Err(FormatError::TagLayout {
                    offset,
                    detail: "malformed metadata tag".to_string(),
                });
            }
            // Metadata must live inside the frame, past the IFD's last byte.
            if value < offset + ifd_len as u64 {
                return Err(FormatError::TagLayout {
                    offset,
                    detail: format!("metadata offset {} precedes frame payload", value),
                });
            }
            (value, count)
        } else {
            (0, 0)
        };

        let next_pos = next_ptr_pos(variant, tag_count);
        let next_ifd = match variant {
            TiffVariant::Classic => {
                u32::from_le_bytes(bytes[next_pos..next_pos + 4].try_into().unwrap()) as u64
            }
            TiffVariant::Big => {
                u64::from_le_bytes(bytes[next_pos..next_pos + 8].try_into().unwrap())
            }
        };

        Ok(ImageIfd {
            offset,
            tag_count,
            width,
            height,
            pixel_format,
            strip_offset,
            strip_len,
            meta_offset,
            meta_len,
            next_ifd,
            ifd_len,
        })
    }

    /// End of the frame this IFD describes: strip, padding and metadata
    /// included, rounded up to the alignment boundary.
    pub fn frame_end(&self, align: u64) -> u64 {
        let strip_end = align_up(self.strip_offset + self.strip_len, align);
        if self.meta_len > 0 {
            align_up(self.meta_offset + self.meta_len, align)
        } else {
            strip_end
        }
    }
}

fn decode_entry(bytes: &[u8], pos: usize, variant: TiffVariant) -> (u16, u16, u64, u64) {
    let tag = u16::from_le_bytes([bytes[pos], bytes[pos + 1]]);
    let ftype = u16::from_le_bytes([bytes[pos + 2], bytes[pos + 3]]);
    match variant {
        TiffVariant::Classic => {
            let count = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap()) as u64;
            let value = u32::from_le_bytes(bytes[pos + 8..pos + 12].try_into().unwrap()) as u64;
            (tag, ftype, count, value)
        }
        TiffVariant::Big => {
            let count = u64::from_le_bytes(bytes[pos + 4..pos + 12].try_into().unwrap());
            let value = u64::from_le_bytes(bytes[pos + 12..pos + 20].try_into().unwrap());
            (tag, ftype, count, value)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
