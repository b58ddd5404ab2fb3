//! Logical dataset over one or more chunk files.
//!
//! A [`Dataset`] is a directory named `<stem>.g2s` holding chunk files
//! (`<stem>.g2s.tif`, `<stem>_1.g2s.tif`, ...) and optionally the
//! `axisinfo.txt` sidecar. It governs the facts every chunk must agree on
//! (UUID, shape, pixel format, chunk size), routes appends across chunks
//! with rollover, and resolves N-dimensional coordinates to frames for
//! random access.
//!
//! Write-mode datasets are append-only and exist from [`Dataset::create`]
//! until [`Dataset::close`]; loaded datasets are immutable. A dropped writer
//! is recoverable: loading the same directory accepts the longest intact
//! frame prefix of the tail chunk.

pub mod axes;
pub mod coords;

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunk::ChunkStream;
use crate::config::StorageConfig;
use crate::error::{FormatError, IoError, Result, StorageError};
use crate::format::{PixelFormat, TiffVariant};

pub use axes::{Axis, AxisInfo, AXIS_INFO_FILE};
pub use coords::CoordSpace;

/// Extension of a dataset directory.
pub const DATASET_DIR_EXT: &str = ".g2s";

/// Extension of a chunk file.
pub const CHUNK_FILE_EXT: &str = ".g2s.tif";

/// File name of chunk `index` for a dataset stem.
pub fn chunk_file_name(stem: &str, index: u32) -> String {
    if index == 0 {
        format!("{}{}", stem, CHUNK_FILE_EXT)
    } else {
        format!("{}_{}{}", stem, index, CHUNK_FILE_EXT)
    }
}

/// Case-insensitive chunk-file extension match.
fn is_chunk_file(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".tif") || lower.ends_with(".tiff")
}

// =============================================================================
// ChunkSlot
// =============================================================================

/// One chunk of the dataset: its path, its stream when open, and its frame
/// count once known.
struct ChunkSlot {
    path: PathBuf,
    stream: Option<ChunkStream>,
    image_count: Option<usize>,
}

// =============================================================================
// Dataset
// =============================================================================

/// A logical collection of chunk streams behind one shape and identity.
pub struct Dataset {
    dir: PathBuf,
    stem: String,
    variant: TiffVariant,
    direct_io: bool,
    sector_override: Option<u32>,
    flush_interval: u32,

    write_mode: bool,
    open: bool,
    partial: bool,

    uuid: Option<Uuid>,
    shape: Vec<u32>,
    coords: Option<CoordSpace>,
    pixel_format: PixelFormat,
    chunk_size: u32,
    summary_meta: Bytes,
    summary_meta_set: bool,
    axis_info: AxisInfo,

    chunks: Vec<ChunkSlot>,
    image_count: u64,
    seq_cursor: u64,
}

impl Dataset {
    // -------------------------------------------------------------------------
    // Create / load
    // -------------------------------------------------------------------------

    /// Create a new dataset directory and its first chunk.
    ///
    /// `path` names the dataset with or without the `.g2s` suffix. When the
    /// directory already exists the name is suffixed (`<stem>_1.g2s`, ...)
    /// unless `force_exact_name` is set, in which case creation fails with
    /// `AlreadyExists`.
    pub async fn create(
        path: &Path,
        config: &StorageConfig,
        force_exact_name: bool,
    ) -> Result<Dataset> {
        let stem = dataset_stem(path)?;
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let mut dir = parent.join(format!("{}{}", stem, DATASET_DIR_EXT));
        if path_exists(&dir).await {
            if force_exact_name {
                return Err(StorageError::AlreadyExists(dir));
            }
            let mut counter = 1u32;
            loop {
                let candidate = parent.join(format!("{}_{}{}", stem, counter, DATASET_DIR_EXT));
                if !path_exists(&candidate).await {
                    dir = candidate;
                    break;
                }
                counter += 1;
            }
        }

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| IoError::OpenFailed {
                path: dir.clone(),
                source,
            })?;

        let variant = if config.big_tiff {
            TiffVariant::Big
        } else {
            TiffVariant::Classic
        };
        let chunk_path = dir.join(chunk_file_name(&stem, 0));
        let mut chunk = ChunkStream::create(
            &chunk_path,
            variant,
            0,
            config.direct_io,
            config.sector_size,
        )
        .await?;
        chunk.write_shape(&[], config.chunk_size).await?;

        info!(dir = %dir.display(), "created dataset");
        Ok(Dataset {
            dir,
            stem,
            variant,
            direct_io: config.direct_io,
            sector_override: config.sector_size,
            flush_interval: config.flush_interval,
            write_mode: true,
            open: true,
            partial: false,
            uuid: None,
            shape: Vec::new(),
            coords: None,
            pixel_format: PixelFormat::default(),
            chunk_size: config.chunk_size,
            summary_meta: Bytes::new(),
            summary_meta_set: false,
            axis_info: AxisInfo::for_shape(&[]),
            chunks: vec![ChunkSlot {
                path: chunk_path,
                stream: Some(chunk),
                image_count: Some(0),
            }],
            image_count: 0,
            seq_cursor: 0,
        })
    }

    /// Load an existing dataset for reading.
    ///
    /// `path` may name the dataset directory (with or without the `.g2s`
    /// suffix) or the first chunk file inside it. Chunk files are ordered by
    /// their embedded chunk index; the first and last chunks are parsed
    /// eagerly, the rest open lazily on first touch.
    pub async fn load(path: &Path, config: &StorageConfig) -> Result<Dataset> {
        let dir = resolve_dataset_dir(path).await?;
        let stem = dataset_stem(&dir)?;

        // Enumerate candidate chunk files.
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|source| IoError::OpenFailed {
                path: dir.clone(),
                source,
            })?;
        while let Some(entry) = entries.next_entry().await.map_err(|source| {
            IoError::OpenFailed {
                path: dir.clone(),
                source,
            }
        })? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir && is_chunk_file(&name) {
                names.push(name);
            }
        }
        if names.is_empty() {
            return Err(StorageError::NotFound(format!(
                "no chunk files in {}",
                dir.display()
            )));
        }

        // Open every chunk's header and order by the embedded chunk index.
        let mut opened = Vec::with_capacity(names.len());
        for name in names {
            let chunk_path = dir.join(&name);
            let stream =
                ChunkStream::open_existing(&chunk_path, config.direct_io, config.sector_size)
                    .await?;
            opened.push((stream.chunk_index(), chunk_path, stream));
        }
        opened.sort_by_key(|(index, _, _)| *index);

        for (expected, (found, _, _)) in opened.iter().enumerate() {
            let expected = expected as u32;
            if *found > expected {
                return Err(FormatError::MissingChunk { index: expected }.into());
            }
            if *found < expected {
                return Err(FormatError::DuplicateChunk { index: *found }.into());
            }
        }

        // Chunk 0 carries the dataset facts; all others must agree.
        let (_, _, first) = &opened[0];
        let variant = first.variant();
        let uuid_bytes = first.header().uuid;
        let shape = first.header().shape.clone();
        let chunk_size = first.header().chunk_size;
        for (_, _, stream) in &opened[1..] {
            let header = stream.header();
            if header.uuid != uuid_bytes {
                return Err(FormatError::UidMismatch {
                    chunk_index: header.chunk_index,
                    expected: render_uuid(&uuid_bytes),
                    found: render_uuid(&header.uuid),
                }
                .into());
            }
            if header.shape != shape || header.chunk_size != chunk_size {
                return Err(FormatError::ShapeMismatch {
                    chunk_index: header.chunk_index,
                }
                .into());
            }
        }
        if shape.len() < 2 {
            return Err(FormatError::ShapeMismatch { chunk_index: 0 }.into());
        }

        let chunk_count = opened.len();
        let mut chunks: Vec<ChunkSlot> = opened
            .into_iter()
            .map(|(_, path, stream)| ChunkSlot {
                path,
                stream: Some(stream),
                image_count: None,
            })
            .collect();

        // Parse the first and last chunks; middles stay lazily closed.
        let mut partial = false;
        let (first_count, first_partial, mut pixel_format) = {
            let stream = chunks[0].stream.as_mut().unwrap();
            stream.parse().await?;
            (
                stream.image_count(),
                stream.is_partial(),
                stream.pixel_format(),
            )
        };
        chunks[0].image_count = Some(first_count);
        partial |= first_partial;

        if chunk_count > 1 {
            // Every non-final chunk must be full.
            if first_partial || first_count != chunk_size as usize {
                return Err(FormatError::ShortChunk {
                    chunk_index: 0,
                    expected: chunk_size,
                    found: first_count as u32,
                }
                .into());
            }
            let last = chunk_count - 1;
            let (last_count, last_partial) = {
                let stream = chunks[last].stream.as_mut().unwrap();
                stream.parse().await?;
                pixel_format = pixel_format.or(stream.pixel_format());
                (stream.image_count(), stream.is_partial())
            };
            chunks[last].image_count = Some(last_count);
            partial = last_partial;

            for slot in &mut chunks[1..last] {
                slot.image_count = Some(chunk_size as usize);
                slot.stream = None;
            }
        }

        let image_count: u64 = if chunk_count == 1 {
            chunks[0].image_count.unwrap() as u64
        } else {
            (chunk_count as u64 - 1) * chunk_size as u64
                + chunks[chunk_count - 1].image_count.unwrap() as u64
        };

        let summary_meta = chunks[0]
            .stream
            .as_ref()
            .unwrap()
            .summary_metadata()
            .cloned()
            .unwrap_or_default();

        let uuid = if uuid_bytes.iter().any(|&b| b != 0) {
            Some(Uuid::from_bytes(uuid_bytes))
        } else {
            None
        };

        let axis_info = AxisInfo::load(&dir, &shape).await?;
        let coords = CoordSpace::from_shape(&shape)?;

        if partial {
            warn!(dir = %dir.display(), images = image_count, "loaded partially written dataset");
        } else {
            debug!(dir = %dir.display(), images = image_count, "loaded dataset");
        }

        Ok(Dataset {
            dir,
            stem,
            variant,
            direct_io: config.direct_io,
            sector_override: config.sector_size,
            flush_interval: config.flush_interval,
            write_mode: false,
            open: true,
            partial,
            uuid,
            shape,
            coords: Some(coords),
            pixel_format: pixel_format.unwrap_or_default(),
            chunk_size,
            summary_meta,
            summary_meta_set: false,
            axis_info,
            chunks,
            image_count,
            seq_cursor: 0,
        })
    }

    // -------------------------------------------------------------------------
    // Descriptor accessors
    // -------------------------------------------------------------------------

    /// The dataset directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// The dataset name (directory stem without the `.g2s` suffix).
    pub fn name(&self) -> &str {
        &self.stem
    }

    /// The dataset UUID in dashed lowercase form, when set.
    pub fn uuid_string(&self) -> Option<String> {
        self.uuid.map(|u| u.hyphenated().to_string())
    }

    /// The declared shape, outermost axis first; last two are height, width.
    pub fn shape(&self) -> &[u32] {
        &self.shape
    }

    /// The pixel format of every image plane.
    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Images per chunk; 0 means unchunked.
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Total images stored (recovered count after partial recovery).
    pub fn image_count(&self) -> u64 {
        self.image_count
    }

    /// Whether load recovered this dataset from a truncated state.
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// Whether the dataset is open (false after close).
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Whether this lifetime created the dataset (append allowed).
    pub fn is_write_mode(&self) -> bool {
        self.write_mode
    }

    /// The cached summary metadata.
    pub fn summary_metadata(&self) -> &Bytes {
        &self.summary_meta
    }

    /// Axis names, descriptions and coordinate labels.
    pub fn axis_info(&self) -> &AxisInfo {
        &self.axis_info
    }

    /// Number of declared axes (pixel axes included).
    pub fn axis_count(&self) -> usize {
        self.shape.len()
    }

    /// Image plane width.
    pub fn width(&self) -> u32 {
        self.shape.last().copied().unwrap_or(0)
    }

    /// Image plane height.
    pub fn height(&self) -> u32 {
        if self.shape.len() >= 2 {
            self.shape[self.shape.len() - 2]
        } else {
            0
        }
    }

    // -------------------------------------------------------------------------
    // Configuration (write mode, before the first image)
    // -------------------------------------------------------------------------

    /// Set the dataset shape.
    ///
    /// Legal in write mode before the first image; after the first image
    /// only a byte-identical shape is accepted (a no-op).
    pub async fn set_shape(&mut self, dims: &[u32]) -> Result<()> {
        self.require_write("shape")?;
        if dims.len() < 2 {
            return Err(StorageError::InvalidArgument(format!(
                "shape needs at least 2 axes, got {}",
                dims.len()
            )));
        }
        if self.image_count > 0 {
            if self.shape == dims {
                return Ok(());
            }
            return Err(StorageError::InvalidState(
                "cannot change the shape after the first image".to_string(),
            ));
        }

        let chunk_size = self.chunk_size;
        self.active_stream()?
            .write_shape(dims, chunk_size)
            .await?;
        self.shape = dims.to_vec();
        self.coords = Some(CoordSpace::from_shape(dims)?);
        if !self.axis_info.is_dirty() {
            self.axis_info = AxisInfo::for_shape(dims);
        }
        Ok(())
    }

    /// Set the pixel format. Same legality rules as [`set_shape`](Self::set_shape).
    pub async fn set_pixel_format(&mut self, bits_per_sample: u8, samples_per_pixel: u8) -> Result<()> {
        self.require_write("pixel format")?;
        let format = PixelFormat::new(bits_per_sample, samples_per_pixel)?;
        if self.image_count > 0 {
            if self.pixel_format == format {
                return Ok(());
            }
            return Err(StorageError::InvalidState(
                "cannot change the pixel format after the first image".to_string(),
            ));
        }
        self.pixel_format = format;
        Ok(())
    }

    /// Set the dataset UUID from its canonical string form.
    ///
    /// Accepts dashed or undashed lowercase/uppercase hex; stores and
    /// re-emits dashed lowercase. Write mode, before the first image.
    pub async fn set_uid(&mut self, uid: &str) -> Result<()> {
        self.require_write("dataset UUID")?;
        if self.image_count > 0 {
            return Err(StorageError::InvalidState(
                "cannot change the dataset UUID after the first image".to_string(),
            ));
        }
        let uuid = Uuid::parse_str(uid).map_err(|_| {
            StorageError::InvalidArgument(format!("malformed dataset UUID: {}", uid))
        })?;
        self.active_stream()?.write_uid(*uuid.as_bytes()).await?;
        self.uuid = Some(uuid);
        Ok(())
    }

    /// Set the summary metadata, written to the first chunk's tail on close.
    ///
    /// Write mode; may be called any time before close.
    pub fn set_summary_metadata(&mut self, meta: impl Into<Bytes>) -> Result<()> {
        self.require_write("summary metadata")?;
        self.summary_meta = meta.into();
        self.summary_meta_set = true;
        Ok(())
    }

    /// Name and describe an axis. Idempotent.
    pub fn configure_dimension(&mut self, axis: usize, name: &str, description: &str) -> Result<()> {
        self.axis_info.set_axis(axis, name, description)
    }

    /// Label one coordinate of a non-pixel axis. Idempotent.
    pub fn configure_coordinate(&mut self, axis: usize, coordinate: usize, label: &str) -> Result<()> {
        self.axis_info.set_coordinate(axis, coordinate, label)
    }

    /// The active (last) chunk stream; always open in write mode.
    fn active_stream(&mut self) -> Result<&mut ChunkStream> {
        self.chunks
            .last_mut()
            .and_then(|slot| slot.stream.as_mut())
            .ok_or_else(|| StorageError::InvalidState("no open chunk stream".to_string()))
    }

    fn require_write(&self, what: &str) -> Result<()> {
        if !self.open {
            return Err(StorageError::InvalidState(format!(
                "cannot set {} on a closed dataset",
                what
            )));
        }
        if !self.write_mode {
            return Err(StorageError::InvalidState(format!(
                "cannot set {} on a read-mode dataset",
                what
            )));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Append
    // -------------------------------------------------------------------------

    /// Append one image; returns its global index.
    ///
    /// Images apply strictly in call order. `coord`, when given, is
    /// informational — appends are never reordered — but its non-leading
    /// entries are range-checked against the shape.
    pub async fn add_image(
        &mut self,
        pixels: &[u8],
        meta: Option<&str>,
        coord: Option<&[u32]>,
    ) -> Result<u64> {
        self.require_write("images")?;
        if self.shape.len() < 2 {
            return Err(StorageError::InvalidState(
                "the dataset shape is not defined".to_string(),
            ));
        }

        let expected = self.pixel_format.plane_bytes(self.width(), self.height());
        if pixels.len() as u64 != expected {
            return Err(StorageError::InvalidArgument(format!(
                "pixel buffer holds {} bytes, plane needs {}",
                pixels.len(),
                expected
            )));
        }
        if let (Some(coord), Some(space)) = (coord, &self.coords) {
            space.coord_to_index(coord)?;
        }

        // Chunk rollover: the next append past a full chunk allocates the
        // following chunk before writing.
        if self.chunk_size > 0 {
            let active_count = self
                .chunks
                .last()
                .and_then(|slot| slot.image_count)
                .unwrap_or(0);
            if active_count as u32 >= self.chunk_size {
                self.roll_over().await?;
            }
        }

        let (width, height, pixel_format, flush_interval) = (
            self.width(),
            self.height(),
            self.pixel_format,
            self.flush_interval,
        );
        let slot = self.chunks.last_mut().unwrap();
        let stream = slot
            .stream
            .as_mut()
            .expect("active chunk is always open in write mode");
        stream
            .append_image(pixels, meta, width, height, pixel_format, flush_interval)
            .await?;
        slot.image_count = Some(stream.image_count());

        let index = self.image_count;
        self.image_count += 1;
        Ok(index)
    }

    /// Allocate the next chunk file and carry the header facts over.
    async fn roll_over(&mut self) -> Result<()> {
        let next_index = self.chunks.len() as u32;
        let path = self.dir.join(chunk_file_name(&self.stem, next_index));
        let mut stream = ChunkStream::create(
            &path,
            self.variant,
            next_index,
            self.direct_io,
            self.sector_override,
        )
        .await?;
        if let Some(uuid) = self.uuid {
            stream.write_uid(*uuid.as_bytes()).await?;
        }
        stream.write_shape(&self.shape, self.chunk_size).await?;

        debug!(path = %path.display(), chunk_index = next_index, "chunk rollover");
        self.chunks.push(ChunkSlot {
            path,
            stream: Some(stream),
            image_count: Some(0),
        });
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Random and sequential reads
    // -------------------------------------------------------------------------

    /// Read the pixel strip of the image at `coord`, or of the next image
    /// in append order when `coord` is `None` (the sequential cursor then
    /// advances).
    pub async fn read_image(&mut self, coord: Option<&[u32]>) -> Result<Bytes> {
        let index = self.resolve_read_index(coord)?;
        let (chunk_index, local) = self.locate(index);
        let stream = self.chunk_stream(chunk_index).await?;
        let ifd = stream.load_ifd(local).await?;
        let strip = stream.read_strip(&ifd).await?;
        if coord.is_none() {
            self.seq_cursor = index + 1;
        }
        Ok(strip)
    }

    /// Read the metadata string of the image at `coord`, or of the image at
    /// the sequential cursor without advancing it. Empty when absent.
    pub async fn read_image_metadata(&mut self, coord: Option<&[u32]>) -> Result<String> {
        let index = self.resolve_read_index(coord)?;
        let (chunk_index, local) = self.locate(index);
        let stream = self.chunk_stream(chunk_index).await?;
        let ifd = stream.load_ifd(local).await?;
        stream.read_image_metadata(&ifd).await
    }

    /// Map a coordinate (or the sequential cursor) to a stored image index.
    fn resolve_read_index(&self, coord: Option<&[u32]>) -> Result<u64> {
        if !self.open {
            return Err(StorageError::InvalidState(
                "cannot read from a closed dataset".to_string(),
            ));
        }
        let index = match coord {
            Some(coord) => {
                let space = self.coords.as_ref().ok_or_else(|| {
                    StorageError::InvalidState("the dataset shape is not defined".to_string())
                })?;
                space.coord_to_index(coord)?
            }
            None => self.seq_cursor,
        };
        if index >= self.image_count {
            return Err(StorageError::NotFound(format!(
                "image {} of {}",
                index, self.image_count
            )));
        }
        Ok(index)
    }

    /// Chunk index and in-chunk offset of a global image index.
    fn locate(&self, index: u64) -> (usize, usize) {
        if self.chunk_size == 0 {
            (0, index as usize)
        } else {
            (
                (index / self.chunk_size as u64) as usize,
                (index % self.chunk_size as u64) as usize,
            )
        }
    }

    /// The open stream for a chunk, opening and parsing it on first touch.
    async fn chunk_stream(&mut self, chunk_index: usize) -> Result<&ChunkStream> {
        let is_last = chunk_index + 1 == self.chunks.len();
        let slot = self
            .chunks
            .get_mut(chunk_index)
            .ok_or_else(|| StorageError::NotFound(format!("chunk {}", chunk_index)))?;

        if slot.stream.is_none() {
            let mut stream =
                ChunkStream::open_existing(&slot.path, self.direct_io, self.sector_override)
                    .await?;
            stream.parse().await?;

            // A lazily-opened chunk is never the tail, so truncation here is
            // corruption rather than recoverable state.
            if !is_last
                && (stream.is_partial() || stream.image_count() != self.chunk_size as usize)
            {
                return Err(FormatError::ShortChunk {
                    chunk_index: chunk_index as u32,
                    expected: self.chunk_size,
                    found: stream.image_count() as u32,
                }
                .into());
            }
            slot.image_count = Some(stream.image_count());
            slot.stream = Some(stream);
        }
        Ok(slot.stream.as_ref().unwrap())
    }

    // -------------------------------------------------------------------------
    // Close
    // -------------------------------------------------------------------------

    /// Close the dataset. Idempotent.
    ///
    /// In write mode this commits the summary metadata to the first chunk's
    /// tail, writes the axis sidecar when configured, and flushes every
    /// chunk. Descriptor facts stay queryable after close.
    pub async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }

        if self.write_mode {
            if self.summary_meta_set && !self.summary_meta.is_empty() {
                let stream = self.chunks[0]
                    .stream
                    .as_mut()
                    .expect("chunk 0 stays open in write mode");
                stream.append_summary_metadata(&self.summary_meta).await?;
            }
            if self.axis_info.is_dirty() {
                self.axis_info.store(&self.dir).await?;
            }
            for slot in &self.chunks {
                if let Some(stream) = &slot.stream {
                    stream.flush().await?;
                }
            }
        }

        for slot in &mut self.chunks {
            slot.stream = None;
        }
        self.open = false;
        info!(dir = %self.dir.display(), images = self.image_count, "closed dataset");
        Ok(())
    }
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("dir", &self.dir)
            .field("shape", &self.shape)
            .field("images", &self.image_count)
            .field("chunks", &self.chunks.len())
            .field("write_mode", &self.write_mode)
            .field("open", &self.open)
            .finish()
    }
}

// =============================================================================
// Path helpers
// =============================================================================

/// The dataset stem of a path: file name without the `.g2s` suffix.
fn dataset_stem(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            StorageError::InvalidArgument(format!("path {} has no name", path.display()))
        })?;
    let stem = name
        .strip_suffix(DATASET_DIR_EXT)
        .unwrap_or(&name)
        .to_string();
    if stem.is_empty() {
        return Err(StorageError::InvalidArgument(format!(
            "path {} has an empty dataset name",
            path.display()
        )));
    }
    Ok(stem)
}

/// Resolve a load path to the dataset directory.
///
/// Accepts the directory itself, the directory without its `.g2s` suffix,
/// or the path of a chunk file inside it.
async fn resolve_dataset_dir(path: &Path) -> Result<PathBuf> {
    let meta = tokio::fs::metadata(path).await;
    match meta {
        Ok(meta) if meta.is_dir() => Ok(path.to_path_buf()),
        Ok(_) => Ok(path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))),
        Err(_) => {
            let with_ext = PathBuf::from(format!("{}{}", path.display(), DATASET_DIR_EXT));
            if path_exists(&with_ext).await {
                Ok(with_ext)
            } else {
                Err(StorageError::NotFound(format!(
                    "dataset {} does not exist",
                    path.display()
                )))
            }
        }
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

fn render_uuid(bytes: &[u8; 16]) -> String {
    Uuid::from_bytes(*bytes).hyphenated().to_string()
}

// =============================================================================
// Tests
// =============================================================================
