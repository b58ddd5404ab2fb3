//! Engine configuration.
//!
//! The engine is an embedded library, so configuration is a plain struct the
//! host fills in. All options have working defaults; `validate()` catches
//! combinations that cannot work before any file is touched.

// =============================================================================
// Default Values
// =============================================================================

/// Default maximum number of dataset descriptors kept in the service cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Default number of appended images between durability flushes.
///
/// 0 disables periodic flushing; data is still flushed on close.
pub const DEFAULT_FLUSH_INTERVAL: u32 = 0;

/// Fallback sector size when the device does not report one.
pub const DEFAULT_SECTOR_SIZE: u32 = 4096;

// =============================================================================
// StorageConfig
// =============================================================================

/// Configuration for a [`StorageService`](crate::service::StorageService)
/// and the datasets it creates.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Use OS-unbuffered (direct) I/O with sector-aligned transfers.
    pub direct_io: bool,

    /// Write BigTIFF containers (64-bit offsets). When false, classic TIFF
    /// containers are written and the per-chunk size limit drops to 4 GiB.
    pub big_tiff: bool,

    /// Maximum images per chunk file. 0 disables chunking (single file).
    pub chunk_size: u32,

    /// Images between `fsync` calls while appending. 0 = flush only on close.
    pub flush_interval: u32,

    /// Maximum dataset descriptors in the service cache.
    pub cache_capacity: usize,

    /// Fail `create`/`load` with `OutOfResources` when the cache is full and
    /// nothing closed can be evicted. When false, the cache grows past
    /// capacity instead of evicting a live dataset.
    pub cache_hard_limit: bool,

    /// Override the probed device sector size (direct I/O only).
    ///
    /// Must be a power of two. Useful for tests and for devices that report
    /// a block size different from their DMA constraint.
    pub sector_size: Option<u32>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            direct_io: false,
            big_tiff: true,
            chunk_size: 0,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_hard_limit: false,
            sector_size: None,
        }
    }
}

impl StorageConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_capacity == 0 {
            return Err("cache_capacity must be greater than 0".to_string());
        }

        if let Some(sector) = self.sector_size {
            if !sector.is_power_of_two() {
                return Err(format!("sector_size must be a power of two, got {}", sector));
            }
            if !(512..=1024 * 1024).contains(&sector) {
                return Err("sector_size must be between 512 and 1MiB".to_string());
            }
        }

        if self.sector_size.is_some() && !self.direct_io {
            return Err("sector_size override requires direct_io".to_string());
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
