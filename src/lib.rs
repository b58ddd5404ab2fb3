//! stackstore - Chunked BigTIFF storage engine for N-dimensional image stacks
//!
//! This library stores multidimensional image datasets in self-describing,
//! BigTIFF-compatible chunk files: each dataset is a directory of one or
//! more chunk files carrying a dataset UUID, the declared shape and an
//! append-ordered chain of image frames (IFD + uncompressed pixel strip +
//! optional per-image metadata).
//!
//! The public entry point is [`StorageService`]: an embedded façade the
//! acquisition loop drives through opaque UUID handles. [`Dataset`] and the
//! layers below it are exported for tools that work with single datasets or
//! chunk files directly.

pub mod chunk;
pub mod config;
pub mod dataset;
pub mod error;
pub mod format;
pub mod io;
pub mod service;

// Re-export commonly used types
pub use chunk::ChunkStream;
pub use config::{StorageConfig, DEFAULT_CACHE_CAPACITY, DEFAULT_SECTOR_SIZE};
pub use dataset::{
    chunk_file_name, Axis, AxisInfo, CoordSpace, Dataset, AXIS_INFO_FILE, CHUNK_FILE_EXT,
    DATASET_DIR_EXT,
};
pub use error::{FormatError, IoError, Result, StorageError};
pub use format::{
    ChunkHeader, Compression, FieldType, FrameLayout, ImageIfd, PixelFormat, TiffTag, TiffVariant,
    HEADER_CAPACITY,
};
pub use io::{AlignedBuf, ByteCursor, CursorMode};
pub use service::StorageService;
