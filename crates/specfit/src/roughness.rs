use std::f64::consts::{PI, TAU};

use rayon::prelude::*;
use specfit_algebra::{LeastSquaresProblem, LevenbergMarquardt};
use specfit_image::Image;

use crate::basis::BasisSet;
use crate::error::FitError;
use crate::shading::{bin_angle, ggx_distribution};
use crate::weights::WeightMap;

const MIN_ROUGHNESS: f64 = 0.01;
const MAX_ROUGHNESS: f64 = 1.0;

/// Rec. 709 luminance.
pub fn luminance(rgb: &[f64; 3]) -> f64 {
    0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2]
}

/// GGX reflectivity and roughness equivalent to a tabulated lobe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GgxFit {
    /// Linear RGB reflectivity at normal incidence.
    pub f0: [f64; 3],
    /// GGX roughness.
    pub alpha: f64,
}

// luminance lobe sampled at the table bins
struct GgxLobeProblem {
    cos_theta: Vec<f64>,
    target: Vec<f64>,
}

impl LeastSquaresProblem for GgxLobeProblem {
    fn num_parameters(&self) -> usize {
        2
    }

    fn residuals(&self, params: &[f64], out: &mut Vec<f64>) {
        out.clear();
        let (alpha, f0) = (params[0], params[1]);
        out.extend(
            self.cos_theta
                .iter()
                .zip(&self.target)
                .map(|(&c, &s)| f0 * ggx_distribution(c, alpha) - s),
        );
    }
}

/// Converts tabulated specular lobes to GGX parameters.
#[derive(Debug, Clone)]
pub struct RoughnessFit {
    resolution: usize,
    cos_theta: Vec<f64>,
    optimizer: LevenbergMarquardt,
}

impl RoughnessFit {
    /// Prepare the bin angles of tables with `resolution` steps.
    pub fn new(resolution: usize) -> Self {
        Self {
            resolution,
            cos_theta: (0..=resolution)
                .map(|i| bin_angle(i as f64, resolution).cos())
                .collect(),
            optimizer: LevenbergMarquardt::default(),
        }
    }

    /// `2π ∫ s(θ) cosθ sinθ dθ` by the trapezoid rule over the bins.
    pub fn hemispherical_integral(&self, lobe: &[[f64; 3]]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (i, pair) in lobe.windows(2).enumerate() {
            let (u0, u1) = (self.cos_theta[i], self.cos_theta[i + 1]);
            for (c, o) in out.iter_mut().enumerate() {
                *o += 0.5 * (pair[0][c] * u0 + pair[1][c] * u1) * (u0 - u1);
            }
        }
        out.map(|v| TAU * v)
    }

    /// Fit a single lobe of `resolution + 1` bins.
    ///
    /// An empty lobe maps to `α = 1` with zero reflectivity.
    pub fn fit_lobe(&self, lobe: &[[f64; 3]]) -> GgxFit {
        let f0 = self.hemispherical_integral(lobe);
        let f0_lum = luminance(&f0);
        let peak = lobe.first().map_or(0.0, luminance);
        if !(f0_lum > 0.0 && peak > 0.0) {
            return GgxFit {
                f0: [0.0; 3],
                alpha: MAX_ROUGHNESS,
            };
        }
        let alpha = (f0_lum / (PI * peak)).sqrt().clamp(MIN_ROUGHNESS, MAX_ROUGHNESS);

        let problem = GgxLobeProblem {
            cos_theta: self.cos_theta.clone(),
            target: lobe.iter().map(luminance).collect(),
        };
        let (alpha, refined_lum) = match self.optimizer.optimize(&problem, &[alpha, f0_lum]) {
            Ok(result) if result.params[1] > 0.0 => (
                result.params[0].abs().clamp(MIN_ROUGHNESS, MAX_ROUGHNESS),
                result.params[1],
            ),
            _ => (alpha, f0_lum),
        };

        let scale = refined_lum / f0_lum;
        GgxFit {
            f0: f0.map(|v| (v * scale).max(0.0)),
            alpha,
        }
    }

    /// Fit every texel's weighted lobe.
    ///
    /// # Returns
    ///
    /// The reflectivity map and the roughness map.
    pub fn fit(
        &self,
        basis: &BasisSet,
        weights: &WeightMap,
    ) -> Result<(Image<f32, 3>, Image<f32, 1>), FitError> {
        if basis.resolution() != self.resolution {
            return Err(FitError::CountMismatch {
                stage: "roughness fit",
                what: "basis bins",
                expected: self.resolution + 1,
                actual: basis.resolution() + 1,
            });
        }

        let fits: Vec<GgxFit> = (0..weights.size().num_pixels())
            .into_par_iter()
            .map(|t| {
                let w = weights.texel(t);
                let lobe: Vec<[f64; 3]> = (0..=self.resolution)
                    .map(|i| basis.weighted_specular(w, i as f64))
                    .collect();
                self.fit_lobe(&lobe)
            })
            .collect();

        let size = weights.size();
        let specular = Image::new(
            size,
            fits.iter().flat_map(|f| f.f0.map(|v| v as f32)).collect(),
        )?;
        let roughness = Image::new(size, fits.iter().map(|f| f.alpha as f32).collect())?;
        Ok((specular, roughness))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ggx_table(fit: &RoughnessFit, f0: [f64; 3], alpha: f64) -> Vec<[f64; 3]> {
        fit.cos_theta
            .iter()
            .map(|&c| f0.map(|f| f * ggx_distribution(c, alpha)))
            .collect()
    }

    #[test]
    fn recovers_ggx_parameters() {
        let fit = RoughnessFit::new(90);
        let f0 = [0.04, 0.05, 0.06];
        let lobe = ggx_table(&fit, f0, 0.3);

        let result = fit.fit_lobe(&lobe);
        assert_relative_eq!(result.alpha, 0.3, epsilon = 1e-3);
        let lum = luminance(&result.f0);
        assert_relative_eq!(lum, luminance(&f0), max_relative = 1e-3);
        // channel ratios follow the integrated lobe
        assert_relative_eq!(result.f0[2] / result.f0[0], 1.5, max_relative = 1e-6);
    }

    #[test]
    fn integral_of_normalized_lobe_is_reflectivity() {
        let fit = RoughnessFit::new(400);
        let lobe = ggx_table(&fit, [1.0; 3], 0.8);
        let f0 = fit.hemispherical_integral(&lobe);
        assert_relative_eq!(f0[0], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn empty_lobe_is_rough_and_black() {
        let fit = RoughnessFit::new(10);
        let result = fit.fit_lobe(&vec![[0.0; 3]; 11]);
        assert_eq!(result.alpha, 1.0);
        assert_eq!(result.f0, [0.0; 3]);
    }

    #[test]
    fn maps_have_texture_size() -> Result<(), FitError> {
        let fit = RoughnessFit::new(4);
        let basis = BasisSet::zeros(2, 4);
        let weights = WeightMap::uniform([3, 2].into(), 2);
        let (specular, roughness) = fit.fit(&basis, &weights)?;
        assert_eq!(specular.size(), weights.size());
        assert!(roughness.as_slice().iter().all(|&a| a == 1.0));

        assert!(RoughnessFit::new(5).fit(&basis, &weights).is_err());
        Ok(())
    }
}
