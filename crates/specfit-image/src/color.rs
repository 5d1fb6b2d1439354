use crate::image::Image;

/// Encode a linear value with the sRGB transfer function.
///
/// Values above one are extended with the same power curve so that
/// high-dynamic-range radiance keeps its ordering. Negative values map to zero.
///
/// # Example
///
/// ```
/// use specfit_image::color::srgb_from_linear;
///
/// assert_eq!(srgb_from_linear(0.0), 0.0);
/// assert!((srgb_from_linear(1.0) - 1.0).abs() < 1e-6);
/// ```
pub fn srgb_from_linear(x: f32) -> f32 {
    if x <= 0.0 {
        0.0
    } else if x <= 0.003_130_8 {
        12.92 * x
    } else {
        1.055 * x.powf(1.0 / 2.4) - 0.055
    }
}

/// Decode an sRGB encoded value back to linear.
pub fn linear_from_srgb(x: f32) -> f32 {
    if x <= 0.0 {
        0.0
    } else if x <= 0.040_45 {
        x / 12.92
    } else {
        ((x + 0.055) / 1.055).powf(2.4)
    }
}

/// Encode every channel of a linear image to sRGB.
///
/// Alpha channels must be split off beforehand; every channel is encoded.
pub fn srgb_image_from_linear<const C: usize>(src: &Image<f32, C>) -> Image<f32, C> {
    src.map(|&v| srgb_from_linear(v))
}

/// Decode every channel of an sRGB image to linear.
pub fn linear_image_from_srgb<const C: usize>(src: &Image<f32, C>) -> Image<f32, C> {
    src.map(|&v| linear_from_srgb(v))
}
