use std::f64::consts::FRAC_1_PI;

use crate::basis::BasisSet;
use crate::material::FitSolution;
use crate::shading::{ggx_distribution, SampleGeometry};

/// The reflectance model used to render a reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconstructionMethod {
    /// Diffuse and specular both from the weighted basis.
    Basis,
    /// Final diffuse map with the weighted basis lobe.
    FinalDiffuse,
    /// Final diffuse map with the continuous GGX lobe.
    Ggx,
}

impl ReconstructionMethod {
    /// Every method, in report order.
    pub const ALL: [ReconstructionMethod; 3] = [Self::Basis, Self::FinalDiffuse, Self::Ggx];

    /// Label used in the RMSE report.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Basis => "basis",
            Self::FinalDiffuse => "final diffuse",
            Self::Ggx => "reflectivity",
        }
    }

    /// Output directory for per-view images, when the method writes them.
    pub fn directory(&self) -> Option<&'static str> {
        match self {
            Self::Basis => Some("basis"),
            Self::FinalDiffuse => None,
            Self::Ggx => Some("reflectivity"),
        }
    }
}

/// BRDF of the basis model, `Σ_b w_b [d_b/π (1 − μ) + geom s_b(m)]`.
///
/// The stored lobes already include the metallic floor `μ d_b / π`.
pub fn basis_brdf(
    basis: &BasisSet,
    weights: &[f64],
    sample: &SampleGeometry,
    metallicity: f64,
    masking: bool,
) -> [f64; 3] {
    let geom = sample.geometry_factor(masking);
    let m = sample.halfway_index(basis.resolution());
    let diffuse = basis.weighted_diffuse(weights);
    let specular = basis.weighted_specular(weights, m);
    std::array::from_fn(|c| diffuse[c] * FRAC_1_PI * (1.0 - metallicity) + geom * specular[c])
}

/// Evaluates a fitted solution for any [`ReconstructionMethod`].
#[derive(Debug, Clone, Copy)]
pub struct ReflectanceModel<'a> {
    solution: &'a FitSolution,
    metallicity: f64,
    masking: bool,
}

impl<'a> ReflectanceModel<'a> {
    /// Wrap a solution with the shading switches it was fitted with.
    pub fn new(solution: &'a FitSolution, metallicity: f64, masking: bool) -> Self {
        Self {
            solution,
            metallicity,
            masking,
        }
    }

    /// The wrapped solution.
    pub fn solution(&self) -> &'a FitSolution {
        self.solution
    }

    /// Predicted linear radiance of texel `t` for one sample.
    pub fn radiance(
        &self,
        method: ReconstructionMethod,
        t: usize,
        sample: &SampleGeometry,
    ) -> [f64; 3] {
        let sol = self.solution;
        let incident = sample.incident();
        let brdf = match method {
            ReconstructionMethod::Basis => {
                let brdf = basis_brdf(
                    &sol.basis,
                    sol.weights.texel(t),
                    sample,
                    self.metallicity,
                    self.masking,
                );
                return std::array::from_fn(|c| incident[c] * brdf[c]);
            }
            ReconstructionMethod::FinalDiffuse => {
                let m = sample.halfway_index(sol.basis.resolution());
                sol.basis.weighted_specular(sol.weights.texel(t), m)
            }
            ReconstructionMethod::Ggx => {
                let d = ggx_distribution(sample.n_dot_h, sol.material.roughness_at(t));
                sol.material.specular_at(t).map(|f0| f0 * d)
            }
        };

        let geom = sample.geometry_factor(self.masking);
        let diffuse = sol.material.diffuse_at(t);
        let constant = sol.material.constant_at(t);
        std::array::from_fn(|c| {
            incident[c] * (diffuse[c] * FRAC_1_PI + geom * brdf[c])
                + sample.irradiance[c] * constant[c]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::MaterialEstimate;
    use crate::weights::WeightMap;
    use approx::assert_relative_eq;
    use glam::DVec3;

    fn head_on() -> SampleGeometry {
        SampleGeometry {
            n_dot_l: 1.0,
            n_dot_v: 1.0,
            n_dot_h: 1.0,
            v_dot_h: 1.0,
            irradiance: DVec3::splat(2.0),
        }
    }

    #[test]
    fn basis_and_final_diffuse_agree_for_matching_maps() -> Result<(), crate::FitError> {
        let mut basis = BasisSet::zeros(1, 2);
        basis.set(0, [0.5, 0.25, 0.0], vec![[0.4; 3], [0.2; 3], [0.0; 3]]);
        let mut material = MaterialEstimate::flat([1, 1].into())?;
        material.diffuse.as_slice_mut().copy_from_slice(&[0.5, 0.25, 0.0]);
        let solution = FitSolution {
            basis,
            weights: WeightMap::uniform([1, 1].into(), 1),
            material,
        };

        let model = ReflectanceModel::new(&solution, 0.0, true);
        let s = head_on();
        let a = model.radiance(ReconstructionMethod::Basis, 0, &s);
        let b = model.radiance(ReconstructionMethod::FinalDiffuse, 0, &s);
        for c in 0..3 {
            assert_relative_eq!(a[c], b[c], epsilon = 1e-7);
        }
        // E (d/π + 0.25 · 0.4)
        assert_relative_eq!(a[0], 2.0 * (0.5 * FRAC_1_PI + 0.1), epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn ggx_uses_reflectivity_and_constant() -> Result<(), crate::FitError> {
        let mut material = MaterialEstimate::flat([1, 1].into())?;
        material.specular.as_slice_mut().copy_from_slice(&[1.0, 0.0, 0.0]);
        material.constant = Some(specfit_image::Image::from_size_val([1, 1].into(), 0.1)?);
        let solution = FitSolution {
            basis: BasisSet::zeros(1, 2),
            weights: WeightMap::uniform([1, 1].into(), 1),
            material,
        };
        let model = ReflectanceModel::new(&solution, 0.0, false);
        let r = model.radiance(ReconstructionMethod::Ggx, 0, &head_on());
        // roughness 1 gives D = 1/π
        assert_relative_eq!(r[0], 2.0 * 0.25 * FRAC_1_PI + 0.2, epsilon = 1e-6);
        assert_relative_eq!(r[1], 0.2, epsilon = 1e-6);
        Ok(())
    }
}
