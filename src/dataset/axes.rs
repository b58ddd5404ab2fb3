//! Per-axis naming and the `axisinfo.txt` sidecar.
//!
//! A dataset may label its axes: a short name and a free-text description
//! for every axis, plus coordinate labels for the non-pixel axes (for
//! example naming channels or stage positions). The labels live in a small
//! line-oriented sidecar next to the chunk files:
//!
//! ```text
//! axis<TAB>P<TAB>XY Position
//! coord<TAB>0<TAB>Position0
//! coord<TAB>1<TAB>Position1
//! axis<TAB>C<TAB>Image channel
//! coord<TAB>0<TAB>DAPI
//! axis<TAB>Y<TAB>Image height
//! axis<TAB>X<TAB>Image width
//! ```
//!
//! `coord` lines attach to the most recent `axis` line. The parser tolerates
//! trailing whitespace and blank terminal lines; an absent file loads as an
//! empty descriptor.

use std::path::Path;

use crate::error::{IoError, Result, StorageError};

/// Sidecar file name inside the dataset directory.
pub const AXIS_INFO_FILE: &str = "axisinfo.txt";

// =============================================================================
// Axis / AxisInfo
// =============================================================================

/// Labels for one axis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Axis {
    /// Short name, e.g. "T" or "C".
    pub name: String,

    /// Free-text description, e.g. "Time point".
    pub description: String,

    /// Coordinate labels; meaningful for non-pixel axes only.
    pub coordinates: Vec<String>,
}

/// Axis labels for a whole dataset.
///
/// The vector is sized to the dataset's axis count (pixel axes included);
/// coordinate-label vectors of the non-pixel axes are sized to the declared
/// axis sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AxisInfo {
    axes: Vec<Axis>,
    /// Set once any name, description or label is configured.
    dirty: bool,
}

impl AxisInfo {
    /// Create an empty descriptor for a dataset shape.
    ///
    /// Coordinate-label vectors of the index axes are pre-sized to the
    /// declared axis sizes; the two pixel axes get none.
    pub fn for_shape(shape: &[u32]) -> Self {
        let axes = shape
            .iter()
            .enumerate()
            .map(|(i, &size)| Axis {
                name: String::new(),
                description: String::new(),
                coordinates: if i < shape.len().saturating_sub(2) {
                    vec![String::new(); size as usize]
                } else {
                    Vec::new()
                },
            })
            .collect();
        AxisInfo { axes, dirty: false }
    }

    /// Number of axes described.
    pub fn axis_count(&self) -> usize {
        self.axes.len()
    }

    /// Whether anything has been configured since creation or load.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The axis at `index`.
    pub fn axis(&self, index: usize) -> Result<&Axis> {
        self.axes.get(index).ok_or_else(|| {
            StorageError::InvalidArgument(format!(
                "axis {} out of range for {} axes",
                index,
                self.axes.len()
            ))
        })
    }

    /// Set the name and description of an axis. Idempotent.
    pub fn set_axis(&mut self, index: usize, name: &str, description: &str) -> Result<()> {
        let count = self.axes.len();
        let axis = self.axes.get_mut(index).ok_or_else(|| {
            StorageError::InvalidArgument(format!(
                "axis {} out of range for {} axes",
                index, count
            ))
        })?;
        axis.name = name.to_string();
        axis.description = description.to_string();
        self.dirty = true;
        Ok(())
    }

    /// Set one coordinate label of a non-pixel axis. Idempotent.
    pub fn set_coordinate(&mut self, index: usize, coordinate: usize, label: &str) -> Result<()> {
        let count = self.axes.len();
        let axis = self.axes.get_mut(index).ok_or_else(|| {
            StorageError::InvalidArgument(format!(
                "axis {} out of range for {} axes",
                index, count
            ))
        })?;
        let slot = axis.coordinates.get_mut(coordinate).ok_or_else(|| {
            StorageError::InvalidArgument(format!(
                "coordinate {} out of range for axis {}",
                coordinate, index
            ))
        })?;
        *slot = label.to_string();
        self.dirty = true;
        Ok(())
    }

    /// The coordinate label at (`index`, `coordinate`).
    pub fn coordinate(&self, index: usize, coordinate: usize) -> Result<&str> {
        let axis = self.axis(index)?;
        axis.coordinates
            .get(coordinate)
            .map(String::as_str)
            .ok_or_else(|| {
                StorageError::InvalidArgument(format!(
                    "coordinate {} out of range for axis {}",
                    coordinate, index
                ))
            })
    }

    // -------------------------------------------------------------------------
    // Sidecar I/O
    // -------------------------------------------------------------------------

    /// Serialize to the sidecar's line format.
    pub fn to_sidecar(&self) -> String {
        let mut out = String::new();
        for axis in &self.axes {
            out.push_str("axis\t");
            out.push_str(&axis.name);
            out.push('\t');
            out.push_str(&axis.description);
            out.push('\n');
            for (i, label) in axis.coordinates.iter().enumerate() {
                out.push_str("coord\t");
                out.push_str(&i.to_string());
                out.push('\t');
                out.push_str(label);
                out.push('\n');
            }
        }
        out
    }

    /// Parse the sidecar's line format.
    ///
    /// Unknown record kinds and malformed lines are skipped; trailing
    /// whitespace and blank lines are tolerated.
    pub fn from_sidecar(text: &str) -> Self {
        let mut axes: Vec<Axis> = Vec::new();
        for line in text.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(3, '\t');
            match parts.next() {
                Some("axis") => {
                    axes.push(Axis {
                        name: parts.next().unwrap_or("").to_string(),
                        description: parts.next().unwrap_or("").to_string(),
                        coordinates: Vec::new(),
                    });
                }
                Some("coord") => {
                    let index: usize = match parts.next().and_then(|s| s.parse().ok()) {
                        Some(i) => i,
                        None => continue,
                    };
                    let label = parts.next().unwrap_or("").to_string();
                    if let Some(axis) = axes.last_mut() {
                        if axis.coordinates.len() <= index {
                            axis.coordinates.resize(index + 1, String::new());
                        }
                        axis.coordinates[index] = label;
                    }
                }
                _ => continue,
            }
        }
        AxisInfo { axes, dirty: false }
    }

    /// Load the sidecar from a dataset directory.
    ///
    /// An absent file loads cleanly as an empty descriptor sized to `shape`.
    pub async fn load(dir: &Path, shape: &[u32]) -> Result<Self> {
        let path = dir.join(AXIS_INFO_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                let mut info = Self::from_sidecar(&text);
                // Size to the dataset shape so configure calls range-check
                // against the declared axes even with a sparse sidecar.
                info.conform_to_shape(shape);
                Ok(info)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::for_shape(shape)),
            Err(source) => Err(IoError::OpenFailed {
                path,
                source,
            }
            .into()),
        }
    }

    /// Write the sidecar into a dataset directory.
    pub async fn store(&self, dir: &Path) -> Result<()> {
        let path = dir.join(AXIS_INFO_FILE);
        tokio::fs::write(&path, self.to_sidecar())
            .await
            .map_err(|source| IoError::WriteFailed {
                offset: 0,
                len: 0,
                source,
            })?;
        Ok(())
    }

    /// Resize the descriptor to a dataset shape, preserving loaded labels.
    fn conform_to_shape(&mut self, shape: &[u32]) {
        let template = Self::for_shape(shape);
        self.axes.resize(template.axes.len(), Axis::default());
        for (axis, tmpl) in self.axes.iter_mut().zip(&template.axes) {
            axis.coordinates
                .resize(tmpl.coordinates.len(), String::new());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
