//! Error types for the storage engine.
//!
//! Errors are layered the same way the crate is:
//! - [`IoError`] — cursor-level failures (open/read/write/seek, alignment)
//! - [`FormatError`] — structural violations of the on-disk container
//! - [`StorageError`] — the public surface; everything converges here
//!
//! Low-level errors bubble unchanged through `#[from]` conversions so `?`
//! works across layers without losing the original failure.

use std::path::PathBuf;

use thiserror::Error;

/// Cursor-level I/O errors.
///
/// Every variant carries enough context to identify the failing transfer:
/// the file path where it applies, and the offset for positioned operations.
#[derive(Debug, Error)]
pub enum IoError {
    /// Opening or creating the file failed.
    #[error("open failed for {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A positioned read failed or hit end-of-file early.
    #[error("read of {len} bytes at offset {offset} failed: {source}")]
    ReadFailed {
        offset: u64,
        len: usize,
        #[source]
        source: std::io::Error,
    },

    /// A positioned write failed.
    #[error("write of {len} bytes at offset {offset} failed: {source}")]
    WriteFailed {
        offset: u64,
        len: usize,
        #[source]
        source: std::io::Error,
    },

    /// Repositioning the file cursor failed.
    #[error("seek to offset {offset} failed: {source}")]
    SeekFailed {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    /// A direct-I/O transfer violated the sector alignment constraint.
    #[error("alignment violation: offset {offset}, length {len}, sector size {sector}")]
    AlignmentViolation { offset: u64, len: usize, sector: u32 },
}

/// Structural violations of the chunk container format.
///
/// These are raised while parsing or validating a chunk file and surface to
/// callers as [`StorageError::Corrupt`], except for the `Unsupported*`
/// variants which map to [`StorageError::Unsupported`].
#[derive(Debug, Error)]
pub enum FormatError {
    /// The byte-order mark is not little-endian "II".
    #[error("invalid byte-order mark: {0:#06x}")]
    BadMagic(u16),

    /// The TIFF version is neither 42 (classic) nor 43 (BigTIFF).
    #[error("unsupported container version: {0}")]
    UnsupportedVersion(u16),

    /// A BigTIFF header declared an offset size other than 8.
    #[error("invalid BigTIFF offset size: {0}")]
    BadOffsetSize(u16),

    /// The header region is shorter than the fixed layout requires.
    #[error("truncated header: {actual} bytes, need {required}")]
    TruncatedHeader { required: usize, actual: usize },

    /// An IFD does not carry the canonical tag set in canonical order.
    #[error("IFD tag layout violation at offset {offset}: {detail}")]
    TagLayout { offset: u64, detail: String },

    /// StripByteCounts disagrees with width * height * bytes * samples.
    #[error("strip size mismatch at IFD offset {offset}: stored {stored}, computed {computed}")]
    BadStripSize {
        offset: u64,
        stored: u64,
        computed: u64,
    },

    /// IFD offsets are not strictly increasing within a chunk.
    #[error("non-monotonic IFD chain: {prev} -> {next}")]
    NonMonotonicIfd { prev: u64, next: u64 },

    /// Chunks of one dataset disagree on the dataset UUID.
    #[error("dataset UUID mismatch: chunk {chunk_index} carries {found}, expected {expected}")]
    UidMismatch {
        chunk_index: u32,
        expected: String,
        found: String,
    },

    /// Chunks of one dataset disagree on shape or chunk size.
    #[error("dataset shape mismatch in chunk {chunk_index}")]
    ShapeMismatch { chunk_index: u32 },

    /// A chunk index expected from the numbering is absent.
    #[error("missing chunk {index}")]
    MissingChunk { index: u32 },

    /// Two chunk files carry the same embedded chunk index.
    #[error("duplicate chunk index {index}")]
    DuplicateChunk { index: u32 },

    /// A non-final chunk holds fewer images than the chunk size.
    #[error("chunk {chunk_index} holds {found} images, expected {expected}")]
    ShortChunk {
        chunk_index: u32,
        expected: u32,
        found: u32,
    },

    /// A compression scheme other than 1 (uncompressed).
    #[error("unsupported compression scheme: {0}")]
    UnsupportedCompression(u16),

    /// A pixel format outside 8/16 bits x 1..=4 samples.
    #[error("unsupported pixel format: {bits} bits, {samples} samples")]
    UnsupportedPixelFormat { bits: u8, samples: u8 },
}

impl FormatError {
    /// Whether this violation maps to `Unsupported` rather than `Corrupt`.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            FormatError::UnsupportedCompression(_) | FormatError::UnsupportedPixelFormat { .. }
        )
    }
}

/// The public error surface of the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Null, out-of-range or otherwise malformed parameter.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not legal for the dataset's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The target path exists and overwrite was not permitted.
    #[error("already exists: {0}")]
    AlreadyExists(PathBuf),

    /// Handle, path or image coordinate does not resolve.
    #[error("not found: {0}")]
    NotFound(String),

    /// The on-disk container violates the format contract.
    #[error("corrupt dataset: {0}")]
    Corrupt(#[source] FormatError),

    /// OS-level I/O failure.
    #[error(transparent)]
    Io(#[from] IoError),

    /// Cache exhausted under the hard limit, or container size exceeded.
    #[error("out of resources: {0}")]
    OutOfResources(String),

    /// Pixel format or compression outside the supported envelope.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<FormatError> for StorageError {
    fn from(err: FormatError) -> Self {
        if err.is_unsupported() {
            StorageError::Unsupported(err.to_string())
        } else {
            StorageError::Corrupt(err)
        }
    }
}

/// Specialized Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
