//! TIFF tag and field type definitions.
//!
//! This module defines the vocabulary for the chunk container format:
//! - Field types that determine how values are encoded
//! - The canonical tag set every image frame carries
//!
//! The definitions support both classic TIFF and BigTIFF containers.

// =============================================================================
// TIFF Field Types
// =============================================================================

/// TIFF field types that determine how values are encoded.
///
/// Each field type has a specific size in bytes, which matters for:
/// - Determining if a value fits inline in an IFD entry
/// - Computing tag value extents during validation
///
/// Note: Only the types the container actually writes are defined. TIFF
/// supports additional types (RATIONAL, FLOAT, etc.) that are not needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    /// Unsigned 8-bit integer (1 byte)
    Byte = 1,

    /// 8-bit ASCII character, NUL-terminated strings (1 byte)
    Ascii = 2,

    /// Unsigned 16-bit integer (2 bytes)
    Short = 3,

    /// Unsigned 32-bit integer (4 bytes)
    Long = 4,

    /// Unsigned 64-bit integer (8 bytes) - BigTIFF only
    Long8 = 16,
}

impl FieldType {
    /// Size of a single value of this type in bytes.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Byte => 1,
            FieldType::Ascii => 1,
            FieldType::Short => 2,
            FieldType::Long => 4,
            FieldType::Long8 => 8,
        }
    }

    /// Create a FieldType from its numeric value.
    ///
    /// Returns `None` for unsupported or unknown type values.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FieldType::Byte),
            2 => Some(FieldType::Ascii),
            3 => Some(FieldType::Short),
            4 => Some(FieldType::Long),
            16 => Some(FieldType::Long8),
            _ => None,
        }
    }

    /// Get the numeric type ID.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

// =============================================================================
// Canonical Tag Set
// =============================================================================

/// The tags an image frame IFD carries, in the order they are written.
///
/// Every frame stores exactly this set: the eight canonical image tags plus,
/// when the frame has per-image metadata, the private metadata tag. Parsers
/// reject IFDs whose tag identifiers or ordering deviate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TiffTag {
    /// Image width in pixels
    ImageWidth = 256,

    /// Image height (length) in pixels
    ImageLength = 257,

    /// Bits per sample (8 or 16)
    BitsPerSample = 258,

    /// Compression scheme (always 1 = uncompressed)
    Compression = 259,

    /// Photometric interpretation (always 1 = BlackIsZero)
    PhotometricInterpretation = 262,

    /// Byte offset of the single pixel strip
    StripOffsets = 273,

    /// Number of components per pixel (1..=4)
    SamplesPerPixel = 277,

    /// Byte count of the single pixel strip
    StripByteCounts = 279,

    /// Private tag carrying the per-image metadata string (offset, length)
    PrivateMetadata = 65000,
}

impl TiffTag {
    /// The canonical tag order of a frame IFD, metadata tag excluded.
    pub const CANONICAL: [TiffTag; 8] = [
        TiffTag::ImageWidth,
        TiffTag::ImageLength,
        TiffTag::BitsPerSample,
        TiffTag::Compression,
        TiffTag::PhotometricInterpretation,
        TiffTag::StripOffsets,
        TiffTag::SamplesPerPixel,
        TiffTag::StripByteCounts,
    ];

    /// Create a TiffTag from its numeric value.
    ///
    /// Returns `None` for tags outside the canonical set.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            256 => Some(TiffTag::ImageWidth),
            257 => Some(TiffTag::ImageLength),
            258 => Some(TiffTag::BitsPerSample),
            259 => Some(TiffTag::Compression),
            262 => Some(TiffTag::PhotometricInterpretation),
            273 => Some(TiffTag::StripOffsets),
            277 => Some(TiffTag::SamplesPerPixel),
            279 => Some(TiffTag::StripByteCounts),
            65000 => Some(TiffTag::PrivateMetadata),
            _ => None,
        }
    }

    /// Get the numeric tag ID.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

// =============================================================================
// Compression Values
// =============================================================================

/// TIFF compression scheme identifiers.
///
/// The engine writes and accepts only uncompressed strips (value 1).
/// Any other scheme found while parsing is rejected as unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Compression {
    /// No compression
    None = 1,
}

impl Compression {
    /// Create a Compression from its numeric value.
    ///
    /// Returns `None` for any scheme other than uncompressed.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Compression::None),
            _ => None,
        }
    }
}

/// PhotometricInterpretation value written for every frame (BlackIsZero).
pub const PHOTOMETRIC_MINISBLACK: u16 = 1;

// =============================================================================
// Tests
// =============================================================================
