use std::f64::consts::FRAC_1_PI;

use rayon::prelude::*;
use specfit_algebra::{NnlsError, NonNegativeLeastSquares, NormalEquations};
use specfit_image::{Image, ImageSize};

use crate::basis::BasisSet;
use crate::error::FitError;
use crate::samples::SampleTable;
use crate::weights::WeightMap;

/// Final diffuse albedo and optional constant term of every texel.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffuseEstimate {
    /// Linear diffuse albedo.
    pub diffuse: Image<f32, 3>,
    /// Constant term, when enabled.
    pub constant: Option<Image<f32, 3>>,
    /// Whether each texel had usable samples.
    pub observed: Vec<bool>,
}

/// Fit the diffuse albedo against what the specular lobe leaves unexplained.
///
/// Per texel and channel this solves, with nonnegative unknowns,
/// `L − E n·l geom S(m) ≈ E n·l d / π + E k`, where `S` is the weighted
/// basis lobe and the constant `k` only takes part when `constant_term` is
/// set. Unobserved texels fall back to the weighted basis diffuse.
pub fn estimate_final_diffuse(
    samples: &SampleTable,
    basis: &BasisSet,
    weights: &WeightMap,
    constant_term: bool,
) -> Result<DiffuseEstimate, FitError> {
    let size: ImageSize = weights.size();
    if samples.num_texels() != size.num_pixels() {
        return Err(FitError::CountMismatch {
            stage: "final diffuse",
            what: "texel sample lists",
            expected: size.num_pixels(),
            actual: samples.num_texels(),
        });
    }
    let solver = NonNegativeLeastSquares::default();
    let dim = if constant_term { 2 } else { 1 };

    let fitted = samples
        .as_slice()
        .par_iter()
        .enumerate()
        .map(|(t, texel)| -> Result<([f32; 3], [f32; 3], bool), NnlsError> {
            let w = weights.texel(t);
            if texel.is_empty() {
                return Ok((basis.weighted_diffuse(w).map(|v| v as f32), [0.0; 3], false));
            }
            let mut diffuse = [0.0f32; 3];
            let mut constant = [0.0f32; 3];
            for c in 0..3 {
                let mut eq = NormalEquations::new(dim);
                for s in texel {
                    let lobe = basis.weighted_specular(w, s.m)[c];
                    let target = s.radiance[c] - s.incident(c) * s.geom * lobe;
                    let row = [s.incident(c) * FRAC_1_PI, s.irradiance[c]];
                    eq.add_row(&row[..dim], target, s.weight);
                }
                let sol = solver.solve(&eq)?;
                diffuse[c] = sol.x[0] as f32;
                if constant_term {
                    constant[c] = sol.x[1] as f32;
                }
            }
            Ok((diffuse, constant, true))
        })
        .collect::<Result<Vec<_>, NnlsError>>()?;

    let diffuse = Image::new(size, fitted.iter().flat_map(|(d, _, _)| *d).collect())?;
    let constant = if constant_term {
        Some(Image::new(size, fitted.iter().flat_map(|(_, k, _)| *k).collect())?)
    } else {
        None
    };
    let observed = fitted.iter().map(|(_, _, o)| *o).collect();

    Ok(DiffuseEstimate {
        diffuse,
        constant,
        observed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::FitSample;
    use approx::assert_relative_eq;

    fn sample(n_dot_l: f64, albedo: f64, constant: f64, lobe: f64) -> FitSample {
        let e = 2.0;
        let geom = 0.25;
        let r = e * n_dot_l * (albedo * FRAC_1_PI + geom * lobe) + e * constant;
        FitSample {
            view: 0,
            irradiance: [e; 3],
            n_dot_l,
            geom,
            m: 0.0,
            radiance: [r; 3],
            weight: 1.0,
        }
    }

    #[test]
    fn subtracts_the_lobe_and_separates_the_constant() -> Result<(), FitError> {
        let mut basis = BasisSet::zeros(1, 2);
        basis.set(0, [0.3; 3], vec![[0.4; 3], [0.2; 3], [0.0; 3]]);
        let weights = WeightMap::uniform([2, 1].into(), 1);
        let table = SampleTable::from_texels(vec![
            vec![
                sample(0.9, 0.5, 0.05, 0.4),
                sample(0.5, 0.5, 0.05, 0.4),
                sample(0.2, 0.5, 0.05, 0.4),
            ],
            vec![],
        ]);

        let est = estimate_final_diffuse(&table, &basis, &weights, true)?;
        let d = est.diffuse.as_slice();
        let k = est.constant.as_ref().unwrap().as_slice();
        assert_relative_eq!(d[0], 0.5, epsilon = 1e-5);
        assert_relative_eq!(k[0], 0.05, epsilon = 1e-5);
        // unobserved texel gets the basis diffuse
        assert_relative_eq!(d[3], 0.3, epsilon = 1e-6);
        assert_eq!(est.observed, vec![true, false]);

        let est = estimate_final_diffuse(&table, &basis, &weights, false)?;
        assert!(est.constant.is_none());
        Ok(())
    }
}
