#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// image representation for texture and view rasters.
pub mod image;

/// Error types for the image module.
pub mod error;

/// Transfer functions between linear radiance and display encodings.
pub mod color;

/// Pixel casting and quantization helpers.
pub mod ops;

pub use crate::error::ImageError;
pub use crate::image::{Image, ImageSize};
