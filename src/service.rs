//! Process-wide storage façade.
//!
//! [`StorageService`] is what an acquisition loop talks to. It resolves
//! opaque handle strings (dataset UUIDs) to live [`Dataset`] objects through
//! a bounded descriptor cache, serializes all calls touching one dataset
//! behind a dataset-scoped lock, and leaves calls against disjoint datasets
//! free to proceed in parallel.
//!
//! Descriptors outlive [`close`](StorageService::close) so shape, metadata
//! and axis queries keep working on closed datasets; only closed
//! descriptors are ever evicted when the cache fills up.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::dataset::{Dataset, DATASET_DIR_EXT};
use crate::error::{IoError, Result, StorageError};
use crate::format::PixelFormat;

// =============================================================================
// DatasetEntry
// =============================================================================

/// One handle-map entry: a dataset behind its own lock.
struct DatasetEntry {
    dataset: Mutex<Dataset>,
}

// =============================================================================
// StorageService
// =============================================================================

/// Façade mapping opaque UUID handles to open datasets.
pub struct StorageService {
    config: StorageConfig,
    entries: RwLock<LruCache<String, Arc<DatasetEntry>>>,
}

impl StorageService {
    /// Create a service with the given configuration.
    pub fn new(config: StorageConfig) -> Result<StorageService> {
        config.validate().map_err(StorageError::InvalidArgument)?;
        Ok(StorageService {
            config,
            entries: RwLock::new(LruCache::unbounded()),
        })
    }

    /// The service configuration.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Create / Load / Close / Delete
    // -------------------------------------------------------------------------

    /// Create a dataset and return its handle.
    ///
    /// The handle doubles as the dataset UUID. The directory name is
    /// collision-suffixed when `path` already exists.
    pub async fn create(
        &self,
        path: &Path,
        shape: &[u32],
        pixel_format: PixelFormat,
        summary_meta: &[u8],
    ) -> Result<String> {
        if shape.len() < 2 {
            return Err(StorageError::InvalidArgument(format!(
                "shape needs at least 2 axes, got {}",
                shape.len()
            )));
        }
        pixel_format.validate()?;
        self.admit().await?;

        let mut dataset = Dataset::create(path, &self.config, false).await?;
        let handle = Uuid::new_v4().hyphenated().to_string();
        dataset.set_uid(&handle).await?;
        dataset.set_shape(shape).await?;
        dataset
            .set_pixel_format(pixel_format.bits_per_sample, pixel_format.samples_per_pixel)
            .await?;
        if !summary_meta.is_empty() {
            dataset.set_summary_metadata(Bytes::copy_from_slice(summary_meta))?;
        }

        info!(handle = %handle, dir = %dataset.path().display(), "dataset created");
        self.insert(handle.clone(), dataset).await?;
        Ok(handle)
    }

    /// Load an existing dataset and return its handle.
    ///
    /// The handle is the stored dataset UUID; datasets written without one
    /// get a freshly generated handle for this session.
    pub async fn load(&self, path: &Path) -> Result<String> {
        self.admit().await?;

        let dataset = Dataset::load(path, &self.config).await?;
        let handle = dataset
            .uuid_string()
            .unwrap_or_else(|| Uuid::new_v4().hyphenated().to_string());

        debug!(handle = %handle, dir = %dataset.path().display(), "dataset loaded");
        self.insert(handle.clone(), dataset).await?;
        Ok(handle)
    }

    /// Close a dataset. The descriptor stays queryable until evicted.
    pub async fn close(&self, handle: &str) -> Result<()> {
        let entry = self.entry(handle).await?;
        let result = entry.dataset.lock().await.close().await;
        result
    }

    /// Delete a dataset: close it, remove its directory, drop the handle.
    pub async fn delete(&self, handle: &str) -> Result<()> {
        let entry = self.entry(handle).await?;
        let dir = {
            let mut dataset = entry.dataset.lock().await;
            dataset.close().await?;
            dataset.path().to_path_buf()
        };

        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|source| IoError::OpenFailed {
                path: dir.clone(),
                source,
            })?;

        self.entries.write().await.pop(handle);
        info!(handle = %handle, dir = %dir.display(), "dataset deleted");
        Ok(())
    }

    /// List dataset directories directly under `dir`.
    ///
    /// A dataset directory is a subdirectory named `*.g2s` holding at least
    /// one chunk file. Non-dataset files and directories are ignored.
    pub async fn list(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut datasets = Vec::new();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|source| IoError::OpenFailed {
                path: dir.to_path_buf(),
                source,
            })?;

        while let Some(entry) = entries.next_entry().await.map_err(|source| {
            IoError::OpenFailed {
                path: dir.to_path_buf(),
                source,
            }
        })? {
            let path = entry.path();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.to_ascii_lowercase().ends_with(DATASET_DIR_EXT) {
                continue;
            }
            if dir_has_chunk_file(&path).await {
                datasets.push(path);
            }
        }

        datasets.sort();
        Ok(datasets)
    }

    /// Close every open dataset and clear the handle map.
    ///
    /// Explicit teardown for process shutdown.
    pub async fn shutdown(&self) -> Result<()> {
        let handles: Vec<Arc<DatasetEntry>> = {
            let entries = self.entries.read().await;
            entries.iter().map(|(_, e)| e.clone()).collect()
        };
        for entry in handles {
            entry.dataset.lock().await.close().await?;
        }
        self.entries.write().await.clear();
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Image I/O
    // -------------------------------------------------------------------------

    /// Append an image to a dataset; returns its global index.
    pub async fn add_image(
        &self,
        handle: &str,
        pixels: &[u8],
        coord: Option<&[u32]>,
        meta: Option<&str>,
    ) -> Result<u64> {
        let entry = self.entry(handle).await?;
        let mut dataset = entry.dataset.lock().await;
        dataset.add_image(pixels, meta, coord).await
    }

    /// Read the pixel strip of an image.
    ///
    /// `None` reads sequentially in append order, advancing the cursor.
    pub async fn get_image(&self, handle: &str, coord: Option<&[u32]>) -> Result<Bytes> {
        let entry = self.entry(handle).await?;
        let mut dataset = entry.dataset.lock().await;
        dataset.read_image(coord).await
    }

    /// Read the per-image metadata string; empty when absent.
    ///
    /// `None` reads at the sequential cursor without advancing it.
    pub async fn get_image_metadata(&self, handle: &str, coord: Option<&[u32]>) -> Result<String> {
        let entry = self.entry(handle).await?;
        let mut dataset = entry.dataset.lock().await;
        dataset.read_image_metadata(coord).await
    }

    // -------------------------------------------------------------------------
    // Descriptor queries
    // -------------------------------------------------------------------------

    /// The dataset summary metadata.
    pub async fn get_summary_meta(&self, handle: &str) -> Result<Bytes> {
        let entry = self.entry(handle).await?;
        let dataset = entry.dataset.lock().await;
        Ok(dataset.summary_metadata().clone())
    }

    /// The declared shape vector.
    pub async fn get_shape(&self, handle: &str) -> Result<Vec<u32>> {
        let entry = self.entry(handle).await?;
        let dataset = entry.dataset.lock().await;
        Ok(dataset.shape().to_vec())
    }

    /// The pixel format.
    pub async fn get_data_type(&self, handle: &str) -> Result<PixelFormat> {
        let entry = self.entry(handle).await?;
        let dataset = entry.dataset.lock().await;
        Ok(dataset.pixel_format())
    }

    /// Number of declared axes (pixel axes included).
    pub async fn get_number_of_dimensions(&self, handle: &str) -> Result<usize> {
        let entry = self.entry(handle).await?;
        let dataset = entry.dataset.lock().await;
        Ok(dataset.axis_count())
    }

    /// Number of images stored.
    pub async fn get_image_count(&self, handle: &str) -> Result<u64> {
        let entry = self.entry(handle).await?;
        let dataset = entry.dataset.lock().await;
        Ok(dataset.image_count())
    }

    /// Where the dataset landed on disk (after collision suffixing).
    pub async fn get_dataset_path(&self, handle: &str) -> Result<PathBuf> {
        let entry = self.entry(handle).await?;
        let dataset = entry.dataset.lock().await;
        Ok(dataset.path().to_path_buf())
    }

    /// Name and description of an axis.
    pub async fn get_dimension(&self, handle: &str, axis: usize) -> Result<(String, String)> {
        let entry = self.entry(handle).await?;
        let dataset = entry.dataset.lock().await;
        let axis = dataset.axis_info().axis(axis)?;
        Ok((axis.name.clone(), axis.description.clone()))
    }

    /// Coordinate label of a non-pixel axis.
    pub async fn get_coordinate(
        &self,
        handle: &str,
        axis: usize,
        coordinate: usize,
    ) -> Result<String> {
        let entry = self.entry(handle).await?;
        let dataset = entry.dataset.lock().await;
        Ok(dataset.axis_info().coordinate(axis, coordinate)?.to_string())
    }

    /// Name and describe an axis. Idempotent.
    pub async fn configure_dimension(
        &self,
        handle: &str,
        axis: usize,
        name: &str,
        description: &str,
    ) -> Result<()> {
        let entry = self.entry(handle).await?;
        let mut dataset = entry.dataset.lock().await;
        dataset.configure_dimension(axis, name, description)
    }

    /// Label one coordinate of a non-pixel axis. Idempotent.
    pub async fn configure_coordinate(
        &self,
        handle: &str,
        axis: usize,
        coordinate: usize,
        label: &str,
    ) -> Result<()> {
        let entry = self.entry(handle).await?;
        let mut dataset = entry.dataset.lock().await;
        dataset.configure_coordinate(axis, coordinate, label)
    }

    // -------------------------------------------------------------------------
    // Cache internals
    // -------------------------------------------------------------------------

    /// Look up a handle, bumping its recency.
    async fn entry(&self, handle: &str) -> Result<Arc<DatasetEntry>> {
        let mut entries = self.entries.write().await;
        entries
            .get(handle)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("handle {}", handle)))
    }

    /// Make room for one more descriptor.
    ///
    /// When the map is at capacity, evict every closed descriptor first.
    /// If everything left is open, fail under the hard limit, otherwise
    /// grow past the soft capacity — an open dataset is never evicted.
    async fn admit(&self) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.len() < self.config.cache_capacity {
            return Ok(());
        }

        self.cache_reduce(&mut entries);

        if entries.len() >= self.config.cache_capacity && self.config.cache_hard_limit {
            return Err(StorageError::OutOfResources(format!(
                "dataset cache holds {} open descriptors at capacity {}",
                entries.len(),
                self.config.cache_capacity
            )));
        }
        Ok(())
    }

    /// Evict every closed descriptor, oldest first.
    fn cache_reduce(&self, entries: &mut LruCache<String, Arc<DatasetEntry>>) {
        let closed: Vec<String> = entries
            .iter()
            .rev()
            .filter_map(|(handle, entry)| {
                // A held lock means the dataset is in use, hence open.
                match entry.dataset.try_lock() {
                    Ok(dataset) if !dataset.is_open() => Some(handle.clone()),
                    _ => None,
                }
            })
            .collect();
        for handle in closed {
            entries.pop(&handle);
            debug!(handle = %handle, "evicted closed dataset descriptor");
        }
    }

    /// Insert a descriptor, replacing a stale entry with the same handle.
    async fn insert(&self, handle: String, dataset: Dataset) -> Result<()> {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.peek(&handle) {
            let stale = match existing.dataset.try_lock() {
                Ok(dataset) => !dataset.is_open(),
                Err(_) => false,
            };
            if !stale {
                return Err(StorageError::InvalidState(format!(
                    "dataset {} is already open",
                    handle
                )));
            }
        }
        entries.put(
            handle,
            Arc::new(DatasetEntry {
                dataset: Mutex::new(dataset),
            }),
        );
        Ok(())
    }
}

impl std::fmt::Debug for StorageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageService")
            .field("cache_capacity", &self.config.cache_capacity)
            .field("cache_hard_limit", &self.config.cache_hard_limit)
            .finish()
    }
}

/// Whether a directory holds at least one chunk file.
async fn dir_has_chunk_file(dir: &Path) -> bool {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return false,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".tif") || name.ends_with(".tiff") {
            return true;
        }
    }
    false
}

// =============================================================================
// Tests
// =============================================================================
