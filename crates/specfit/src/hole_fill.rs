use rayon::prelude::*;
use specfit_image::{Image, ImageSize};

use crate::normal::NEIGHBOURS;

/// Grow valid values into invalid texels by 8-neighbour averaging.
///
/// Each pass reads the previous pass only. Texels for which `fillable` is
/// false are never written nor read.
///
/// # Arguments
///
/// * `data` - Interleaved values, `channels` per texel.
/// * `channels` - Values per texel.
/// * `size` - Raster size.
/// * `valid` - Texels holding trusted values; updated as texels are filled.
/// * `fillable` - Texels that may receive values.
/// * `passes` - Maximum number of dilation passes.
///
/// # Returns
///
/// The number of texels that were filled.
pub fn dilate(
    data: &mut [f64],
    channels: usize,
    size: ImageSize,
    valid: &mut [bool],
    fillable: &[bool],
    passes: usize,
) -> usize {
    let (w, h) = (size.width as i64, size.height as i64);
    let mut filled = 0;

    for _ in 0..passes {
        let prev = data.to_vec();
        let prev_valid = valid.to_vec();
        let newly: Vec<bool> = data
            .par_chunks_exact_mut(channels)
            .enumerate()
            .map(|(t, out)| {
                if prev_valid[t] || !fillable[t] {
                    return false;
                }
                let (x, y) = ((t % size.width) as i64, (t / size.width) as i64);
                let mut sum = vec![0.0; channels];
                let mut n = 0usize;
                for (dx, dy) in NEIGHBOURS {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue;
                    }
                    let nt = (ny * w + nx) as usize;
                    if prev_valid[nt] && fillable[nt] {
                        sum.iter_mut()
                            .zip(&prev[nt * channels..(nt + 1) * channels])
                            .for_each(|(s, v)| *s += v);
                        n += 1;
                    }
                }
                if n == 0 {
                    return false;
                }
                out.iter_mut()
                    .zip(&sum)
                    .for_each(|(o, s)| *o = s / n as f64);
                true
            })
            .collect();

        let count = newly.iter().filter(|&&f| f).count();
        if count == 0 {
            break;
        }
        valid
            .iter_mut()
            .zip(&newly)
            .for_each(|(v, &f)| *v |= f);
        filled += count;
    }
    filled
}

/// [`dilate`] applied to an `f32` image.
pub fn dilate_image<const C: usize>(
    image: &mut Image<f32, C>,
    valid: &[bool],
    fillable: &[bool],
    passes: usize,
) -> usize {
    let mut data: Vec<f64> = image.as_slice().iter().map(|&v| v as f64).collect();
    let mut valid = valid.to_vec();
    let filled = dilate(&mut data, C, image.size(), &mut valid, fillable, passes);
    image
        .as_slice_mut()
        .iter_mut()
        .zip(&data)
        .for_each(|(o, &v)| *o = v as f32);
    filled
}
