#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Error types for I/O operations.
///
/// Defines [`error::IoError`] variants for file access and encoding/decoding failures.
pub mod error;

/// High-level float image reading and writing functions.
///
/// Linear or encoded float rasters are quantized to 16 bits on write and
/// normalized back to `[0, 1]` on read.
pub mod functional;

/// PNG image encoding and decoding.
///
/// Read and write 16-bit gray, RGB and RGBA PNG images.
pub mod png;

/// Internal utility functions for image bit depth conversion.
mod conv_utils;

pub use crate::error::IoError;
