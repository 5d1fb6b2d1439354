use crate::Image;

/// Quantize a normalized float image to 16-bit unsigned integers.
///
/// Values are clamped to `[0, 1]` and rounded to the nearest code. Non-finite values map to zero.
pub fn quantize_u16<const C: usize>(src: &Image<f32, C>) -> Image<u16, C> {
    src.map(|&v| {
        if v.is_finite() {
            (v.clamp(0.0, 1.0) * u16::MAX as f32).round() as u16
        } else {
            0
        }
    })
}

/// Expand a 16-bit image to normalized floats in `[0, 1]`.
pub fn normalize_u16<const C: usize>(src: &Image<u16, C>) -> Image<f32, C> {
    src.map(|&v| v as f32 / u16::MAX as f32)
}
