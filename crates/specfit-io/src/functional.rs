use std::path::Path;

use specfit_image::{
    ops::{normalize_u16, quantize_u16},
    Image,
};

use crate::{error::IoError, png};

/// Writes a float RGB image with values in `[0, 1]` as a 16-bit PNG.
///
/// Values outside the unit range are clamped, non-finite values become zero.
///
/// # Arguments
///
/// * `file_path` - The path to the PNG image.
/// * `image` - The float image to quantize and write.
pub fn write_image_f32_rgb(
    file_path: impl AsRef<Path>,
    image: &Image<f32, 3>,
) -> Result<(), IoError> {
    let file_path = file_path.as_ref();
    log::debug!("writing rgb16 image {}", file_path.display());
    png::write_image_png_rgb16(file_path, &quantize_u16(image))
}

/// Writes a float RGBA image with values in `[0, 1]` as a 16-bit PNG.
pub fn write_image_f32_rgba(
    file_path: impl AsRef<Path>,
    image: &Image<f32, 4>,
) -> Result<(), IoError> {
    let file_path = file_path.as_ref();
    log::debug!("writing rgba16 image {}", file_path.display());
    png::write_image_png_rgba16(file_path, &quantize_u16(image))
}

/// Writes a float single channel image with values in `[0, 1]` as a 16-bit PNG.
pub fn write_image_f32_gray(
    file_path: impl AsRef<Path>,
    image: &Image<f32, 1>,
) -> Result<(), IoError> {
    let file_path = file_path.as_ref();
    log::debug!("writing gray16 image {}", file_path.display());
    png::write_image_png_gray16(file_path, &quantize_u16(image))
}

/// Reads a 16-bit RGB PNG into a float image with values in `[0, 1]`.
pub fn read_image_f32_rgb(file_path: impl AsRef<Path>) -> Result<Image<f32, 3>, IoError> {
    Ok(normalize_u16(&png::read_image_png_rgb16(file_path)?))
}

/// Reads a 16-bit RGBA PNG into a float image with values in `[0, 1]`.
pub fn read_image_f32_rgba(file_path: impl AsRef<Path>) -> Result<Image<f32, 4>, IoError> {
    Ok(normalize_u16(&png::read_image_png_rgba16(file_path)?))
}

/// Reads a 16-bit grayscale PNG into a float image with values in `[0, 1]`.
pub fn read_image_f32_gray(file_path: impl AsRef<Path>) -> Result<Image<f32, 1>, IoError> {
    Ok(normalize_u16(&png::read_image_png_mono16(file_path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use specfit_image::ImageSize;

    #[test]
    fn float_rgba_quantization() -> Result<(), IoError> {
        let tmp_dir = tempfile::tempdir()?;
        let file_path = tmp_dir.path().join("weights.png");

        let size = ImageSize {
            width: 3,
            height: 2,
        };
        let image = Image::<f32, 4>::from_fn(size, |x, y| {
            [x as f32 / 3.0, y as f32 * 0.25, 1.5, -0.1]
        });
        write_image_f32_rgba(&file_path, &image)?;

        let back = read_image_f32_rgba(&file_path)?;
        assert_eq!(back.size(), size);
        for (a, b) in image.as_slice().iter().zip(back.as_slice()) {
            assert!((a.clamp(0.0, 1.0) - b).abs() <= 0.5 / 65535.0 + 1e-7);
        }

        Ok(())
    }
}
