use rayon::prelude::*;
use specfit_image::{color::srgb_from_linear, Image};

use crate::error::FitError;
use crate::render::RenderedView;

/// Weighted squared error sums that merge losslessly before the final root.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ErrorSums {
    /// `Σ ω e²`.
    pub sum_squared_error: f64,
    /// `Σ ω`.
    pub sum_weight: f64,
    /// Number of contributing samples.
    pub count: usize,
}

impl ErrorSums {
    /// Add one sample.
    ///
    /// Samples whose weight is not strictly positive and finite are skipped
    /// entirely, whatever their error value.
    pub fn add(&mut self, squared_error: f64, weight: f64) {
        if !(weight.is_finite() && weight > 0.0) {
            return;
        }
        self.sum_squared_error += weight * squared_error;
        self.sum_weight += weight;
        self.count += 1;
    }

    /// Pool two disjoint sets of samples.
    pub fn merge(self, other: Self) -> Self {
        Self {
            sum_squared_error: self.sum_squared_error + other.sum_squared_error,
            sum_weight: self.sum_weight + other.sum_weight,
            count: self.count + other.count,
        }
    }

    /// `sqrt(Σ ω e² / Σ ω)`, or NaN when no sample had positive weight.
    pub fn rmse(&self) -> f64 {
        if self.sum_weight > 0.0 {
            (self.sum_squared_error / self.sum_weight).sqrt()
        } else {
            f64::NAN
        }
    }
}

/// Domain in which the per-pixel error is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    /// Linear radiance.
    Linear,
    /// Both images sRGB encoded before differencing.
    Srgb,
}

impl ErrorDomain {
    /// Map a linear value into this domain.
    pub fn encode(&self, v: f32) -> f32 {
        match self {
            ErrorDomain::Linear => v,
            ErrorDomain::Srgb => srgb_from_linear(v),
        }
    }

    /// Suffix appended to report labels.
    pub fn suffix(&self) -> &'static str {
        match self {
            ErrorDomain::Linear => "",
            ErrorDomain::Srgb => " (sRGB)",
        }
    }
}

/// Accumulates validity-weighted squared error between predictions and ground truth.
///
/// The per-pixel error is the channel mean of squared differences computed
/// after mapping both images into the accumulator's [`ErrorDomain`].
#[derive(Debug, Clone, Copy)]
pub struct ResidualAccumulator {
    domain: ErrorDomain,
}

impl ResidualAccumulator {
    /// Create an accumulator for `domain`.
    pub fn new(domain: ErrorDomain) -> Self {
        Self { domain }
    }

    /// The error domain.
    pub fn domain(&self) -> ErrorDomain {
        self.domain
    }

    /// Accumulate the error of every pixel.
    ///
    /// # Arguments
    ///
    /// * `prediction` - The rendered image with shape (H, W, 3).
    /// * `ground_truth` - The captured image with shape (H, W, 3).
    /// * `weight` - The validity weight with shape (H, W, 1).
    ///
    /// # Returns
    ///
    /// The pooled sums, ready to be merged with other views.
    ///
    /// # Example
    ///
    /// ```
    /// use specfit::accumulator::{ErrorDomain, ResidualAccumulator};
    /// use specfit_image::{Image, ImageSize};
    ///
    /// let size = ImageSize { width: 2, height: 1 };
    /// let pred = Image::<f32, 3>::new(size, vec![1.0, 1.0, 1.0, 5.0, 5.0, 5.0]).unwrap();
    /// let gt = Image::<f32, 3>::new(size, vec![0.0; 6]).unwrap();
    /// let weight = Image::<f32, 1>::new(size, vec![1.0, 0.0]).unwrap();
    ///
    /// let sums = ResidualAccumulator::new(ErrorDomain::Linear)
    ///     .accumulate_images(&pred, &gt, &weight)
    ///     .unwrap();
    /// assert_eq!(sums.rmse(), 1.0);
    /// ```
    pub fn accumulate_images(
        &self,
        prediction: &Image<f32, 3>,
        ground_truth: &Image<f32, 3>,
        weight: &Image<f32, 1>,
    ) -> Result<ErrorSums, FitError> {
        let gt_size = ground_truth.size();
        FitError::check_size("accumulation", "ground truth", prediction.size(), gt_size)?;
        FitError::check_size("accumulation", "weight", prediction.size(), weight.size())?;

        let domain = self.domain;
        let sums = prediction
            .as_slice()
            .par_chunks_exact(3)
            .zip(ground_truth.as_slice().par_chunks_exact(3))
            .zip(weight.as_slice().par_iter())
            .fold(ErrorSums::default, |mut acc, ((p, g), &w)| {
                if w > 0.0 {
                    let e2 = p
                        .iter()
                        .zip(g)
                        .map(|(&p, &g)| {
                            let d = (domain.encode(p) - domain.encode(g)) as f64;
                            d * d
                        })
                        .sum::<f64>()
                        / 3.0;
                    acc.add(e2, w as f64);
                }
                acc
            })
            .reduce(ErrorSums::default, ErrorSums::merge);

        Ok(sums)
    }

    /// Accumulate the error of a rendered view.
    pub fn accumulate_view(&self, view: &RenderedView) -> Result<ErrorSums, FitError> {
        self.accumulate_images(&view.prediction, &view.ground_truth, &view.weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use specfit_image::ImageSize;

    type Triple = (Image<f32, 3>, Image<f32, 3>, Image<f32, 1>);

    fn images(pred: &[f32], gt: &[f32], w: &[f32]) -> Triple {
        let size = ImageSize {
            width: w.len(),
            height: 1,
        };
        (
            Image::new(size, pred.to_vec()).unwrap(),
            Image::new(size, gt.to_vec()).unwrap(),
            Image::new(size, w.to_vec()).unwrap(),
        )
    }

    #[test]
    fn masked_pixels_are_skipped() -> Result<(), FitError> {
        let acc = ResidualAccumulator::new(ErrorDomain::Linear);
        let (p, g, w) = images(&[0.5; 3], &[0.25; 3], &[2.0]);
        let base = acc.accumulate_images(&p, &g, &w)?;

        for bad in [f32::NAN, f32::INFINITY, 1e30] {
            let (p, g, w) = images(&[0.5, 0.5, 0.5, bad, bad, bad], &[0.25; 6], &[2.0, 0.0]);
            let sums = acc.accumulate_images(&p, &g, &w)?;
            assert_eq!(sums, base);
        }
        assert_relative_eq!(base.rmse(), 0.25);
        Ok(())
    }

    #[test]
    fn pooling_equals_union() -> Result<(), FitError> {
        let acc = ResidualAccumulator::new(ErrorDomain::Srgb);
        let pred = [0.1, 0.2, 0.3, 0.9, 0.8, 0.7, 0.0, 0.5, 1.0, 0.4, 0.4, 0.4];
        let gt = [0.2, 0.2, 0.2, 0.5, 0.5, 0.5, 0.1, 0.4, 0.9, 0.0, 0.0, 0.0];
        let w = [1.0, 3.0, 0.5, 2.0];

        let (p, g, ww) = images(&pred, &gt, &w);
        let union = acc.accumulate_images(&p, &g, &ww)?;

        let (pa, ga, wa) = images(&pred[..3], &gt[..3], &w[..1]);
        let (pb, gb, wb) = images(&pred[3..], &gt[3..], &w[1..]);
        let pooled = acc
            .accumulate_images(&pa, &ga, &wa)?
            .merge(acc.accumulate_images(&pb, &gb, &wb)?);

        assert_eq!(pooled.count, 4);
        assert_relative_eq!(pooled.rmse(), union.rmse(), max_relative = 1e-12);
        Ok(())
    }

    #[test]
    fn zero_weight_is_nan() -> Result<(), FitError> {
        let acc = ResidualAccumulator::new(ErrorDomain::Linear);
        let (p, g, w) = images(&[1.0; 6], &[0.0; 6], &[0.0, -1.0]);
        let sums = acc.accumulate_images(&p, &g, &w)?;
        assert_eq!(sums.count, 0);
        assert!(sums.rmse().is_nan());
        Ok(())
    }

    #[test]
    fn srgb_error_is_recomputed() -> Result<(), FitError> {
        let (p, g, w) = images(&[0.5; 3], &[0.25; 3], &[1.0]);
        let linear = ResidualAccumulator::new(ErrorDomain::Linear).accumulate_images(&p, &g, &w)?;
        let srgb = ResidualAccumulator::new(ErrorDomain::Srgb).accumulate_images(&p, &g, &w)?;
        let expected = (srgb_from_linear(0.5) - srgb_from_linear(0.25)) as f64;
        assert_relative_eq!(srgb.rmse(), expected, epsilon = 1e-6);
        assert!((srgb.rmse() - linear.rmse()).abs() > 1e-3);
        Ok(())
    }

    #[test]
    fn size_mismatch() {
        let acc = ResidualAccumulator::new(ErrorDomain::Linear);
        let (p, g, _) = images(&[0.0; 6], &[0.0; 6], &[1.0, 1.0]);
        let w = Image::<f32, 1>::new([1, 1].into(), vec![1.0]).unwrap();
        assert!(matches!(
            acc.accumulate_images(&p, &g, &w),
            Err(FitError::DimensionMismatch { .. })
        ));
    }
}
