//! Positioned file I/O.
//!
//! [`ByteCursor`] is the only type in the crate that touches a file handle.
//! Everything above it (chunk streams, datasets, the service) works in terms
//! of fetch/commit against explicit read and write cursors.

pub mod cursor;

pub use cursor::{AlignedBuf, ByteCursor, CursorMode};
