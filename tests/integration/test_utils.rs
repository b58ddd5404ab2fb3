//! Shared helpers for the integration tests.

use std::path::Path;

use stackstore::{PixelFormat, StorageConfig};

/// The fixed dataset UUID several scenarios assert on.
pub const TEST_UID: &str = "11111111-2222-3333-4444-555555555555";

/// Default test configuration: buffered BigTIFF, no chunking.
pub fn test_config() -> StorageConfig {
    StorageConfig::default()
}

/// A pixel plane filled with `seed` in every byte.
pub fn plane(format: PixelFormat, width: u32, height: u32, seed: u8) -> Vec<u8> {
    vec![seed; format.plane_bytes(width, height) as usize]
}

/// The per-image JSON metadata the acquisition loop would attach.
pub fn image_meta(index: usize) -> String {
    serde_json::json!({ "i": index }).to_string()
}

/// Row-major coordinates of append index `index` for a full shape vector
/// (pixel axes included, as declared).
pub fn coord_of(index: u64, shape: &[u32]) -> Vec<u32> {
    let axes = &shape[..shape.len() - 2];
    let mut coord = vec![0u32; axes.len()];
    let mut rest = index;
    for i in 0..axes.len() {
        let stride: u64 = axes[i + 1..].iter().map(|&a| a as u64).product();
        coord[i] = (rest / stride) as u32;
        rest %= stride;
    }
    coord
}

/// Names of the chunk files inside a dataset directory, sorted.
pub fn chunk_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| {
            let name = entry.unwrap().file_name().to_string_lossy().into_owned();
            if name.to_ascii_lowercase().ends_with(".tif") {
                Some(name)
            } else {
                None
            }
        })
        .collect();
    names.sort();
    names
}
