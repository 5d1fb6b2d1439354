use specfit_image::ImageSize;

/// Per-texel nonnegative basis weights, `count` values per texel, row major.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightMap {
    size: ImageSize,
    count: usize,
    data: Vec<f64>,
}

impl WeightMap {
    /// Every texel weights every basis equally, summing to one.
    pub fn uniform(size: ImageSize, count: usize) -> Self {
        Self::filled(size, count, 1.0 / count.max(1) as f64)
    }

    /// Every weight is `value`.
    pub fn filled(size: ImageSize, count: usize, value: f64) -> Self {
        Self {
            size,
            count,
            data: vec![value; size.num_pixels() * count],
        }
    }

    /// Wrap existing weights; `None` when the length does not match.
    pub fn from_vec(size: ImageSize, count: usize, data: Vec<f64>) -> Option<Self> {
        (data.len() == size.num_pixels() * count).then_some(Self { size, count, data })
    }

    /// Texture raster size.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Number of basis functions.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Weights of texel `t`.
    pub fn texel(&self, t: usize) -> &[f64] {
        &self.data[t * self.count..(t + 1) * self.count]
    }

    /// Mutable weights of texel `t`.
    pub fn texel_mut(&mut self, t: usize) -> &mut [f64] {
        &mut self.data[t * self.count..(t + 1) * self.count]
    }

    /// All weights.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// All weights, mutable; one chunk of `count` per texel.
    pub fn as_slice_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Whether every weight is nonnegative.
    pub fn is_nonnegative(&self) -> bool {
        self.data.iter().all(|&w| w >= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_sums_to_one() {
        let w = WeightMap::uniform([3, 2].into(), 4);
        assert_eq!(w.as_slice().len(), 24);
        assert!((w.texel(5).iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(w.is_nonnegative());
        assert!(WeightMap::from_vec([1, 1].into(), 2, vec![0.0; 3]).is_none());
    }
}
