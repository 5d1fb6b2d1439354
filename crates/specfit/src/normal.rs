use glam::DVec3;
use rayon::prelude::*;
use specfit_algebra::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use specfit_image::Image;

use crate::basis::BasisSet;
use crate::capture::Capture;
use crate::error::FitError;
use crate::model::basis_brdf;
use crate::progress::ProgressMonitor;
use crate::samples::world_normal;
use crate::settings::{NormalOptimizationSettings, SpecularBasisSettings};
use crate::shading::ShadingContext;
use crate::weights::WeightMap;

const STAGE: &str = "normal refinement";

/// Outcome counters of one refinement pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalRefinementReport {
    /// Texels that had observations and went through the optimizer.
    pub refined_texels: usize,
    /// Texels that exhausted the rejected-step budget.
    pub divergent_texels: usize,
    /// Texels whose optimized normal fell below the surface and was discarded.
    pub rejected_texels: usize,
}

impl NormalRefinementReport {
    fn merge(self, other: Self) -> Self {
        Self {
            refined_texels: self.refined_texels + other.refined_texels,
            divergent_texels: self.divergent_texels + other.divergent_texels,
            rejected_texels: self.rejected_texels + other.rejected_texels,
        }
    }
}

struct Observation {
    context: ShadingContext,
    radiance: [f64; 3],
    sqrt_weight: f64,
}

/// Residuals of one texel as a function of a 2-D tangent chart around its normal.
struct TexelNormalProblem<'a> {
    position: DVec3,
    normal: DVec3,
    tangent: DVec3,
    bitangent: DVec3,
    observations: Vec<Observation>,
    basis: &'a BasisSet,
    weights: &'a [f64],
    metallicity: f64,
    masking: bool,
}

impl TexelNormalProblem<'_> {
    fn normal_at(&self, params: &[f64]) -> DVec3 {
        (self.normal + self.tangent * params[0] + self.bitangent * params[1]).normalize_or_zero()
    }
}

impl LeastSquaresProblem for TexelNormalProblem<'_> {
    fn num_parameters(&self) -> usize {
        2
    }

    fn residuals(&self, params: &[f64], out: &mut Vec<f64>) {
        out.clear();
        let n = self.normal_at(params);
        for obs in &self.observations {
            // a view that turns away keeps its residual slot with a zero prediction
            let prediction = obs.context.sample(self.position, n).map_or([0.0; 3], |s| {
                let brdf = basis_brdf(self.basis, self.weights, &s, self.metallicity, self.masking);
                let incident = s.incident();
                std::array::from_fn(|c| incident[c] * brdf[c])
            });
            for c in 0..3 {
                out.push(obs.sqrt_weight * (prediction[c] - obs.radiance[c]));
            }
        }
    }
}

/// Per-texel damped Levenberg-Marquardt refinement of the normal map.
pub struct NormalRefinement<'a> {
    settings: &'a NormalOptimizationSettings,
    metallicity: f64,
    masking: bool,
}

impl<'a> NormalRefinement<'a> {
    /// Create a refinement stage.
    pub fn new(settings: &'a NormalOptimizationSettings, basis: &SpecularBasisSettings) -> Self {
        Self {
            settings,
            metallicity: basis.metallicity,
            masking: basis.masking_shadowing_enabled,
        }
    }

    /// The optimizer used for every texel.
    ///
    /// Without the adaptive loop a texel takes a single damped step.
    pub fn optimizer(&self) -> LevenbergMarquardt {
        let s = self.settings;
        LevenbergMarquardt {
            lambda_init: s.min_normal_damping.max(1.0),
            lambda_min: s.min_normal_damping,
            max_iterations: if s.levenberg_marquardt_enabled {
                s.max_lm_iterations
            } else {
                1
            },
            cost_tolerance: s.convergence_tolerance,
            unsuccessful_iterations_allowed: s.unsuccessful_lm_iterations_allowed,
            finite_difference_step: 1e-4,
            ..Default::default()
        }
    }

    /// Refine every observed texel of `normals` in place.
    ///
    /// Texels keep their previous normal when the optimizer fails, diverges,
    /// or proposes a normal below the geometric surface.
    ///
    /// # Arguments
    ///
    /// * `capture` - The fitting capture.
    /// * `basis` - The current basis.
    /// * `weights` - The current weights.
    /// * `normals` - Tangent-space normals, updated in place.
    /// * `progress` - Polled between optimizer iterations for cancellation.
    pub fn refine(
        &self,
        capture: &Capture,
        basis: &BasisSet,
        weights: &WeightMap,
        normals: &mut Image<f32, 3>,
        progress: &dyn ProgressMonitor,
    ) -> Result<NormalRefinementReport, FitError> {
        let size = capture.texture_size();
        FitError::check_size(STAGE, "normal map", weights.size(), normals.size())?;
        FitError::check_size(STAGE, "weight map", size, weights.size())?;

        let contexts = ShadingContext::for_views(&capture.view_set);
        let optimizer = self.optimizer();
        let previous = normals.clone();

        let report = normals
            .as_slice_mut()
            .par_chunks_exact_mut(3)
            .enumerate()
            .map(|(t, out)| {
                let mut report = NormalRefinementReport::default();
                if !capture.geometry.is_covered(t) {
                    return report;
                }
                let observations: Vec<Observation> = capture
                    .observations
                    .iter()
                    .zip(&contexts)
                    .filter_map(|(obs, ctx)| {
                        let (radiance, weight) = obs.sample(t)?;
                        Some(Observation {
                            context: *ctx,
                            radiance,
                            sqrt_weight: weight.sqrt(),
                        })
                    })
                    .collect();
                if observations.is_empty() {
                    return report;
                }

                let frame = capture.geometry.frame(t);
                let n0 = world_normal(capture, &previous, t);
                if n0 == DVec3::ZERO {
                    return report;
                }
                let tangent =
                    (frame.t - n0 * n0.dot(frame.t)).normalize_or(n0.any_orthonormal_vector());
                let problem = TexelNormalProblem {
                    position: capture.geometry.position(t),
                    normal: n0,
                    tangent,
                    bitangent: n0.cross(tangent),
                    observations,
                    basis,
                    weights: weights.texel(t),
                    metallicity: self.metallicity,
                    masking: self.masking,
                };

                report.refined_texels = 1;
                let result = match optimizer
                    .optimize_with_callback(&problem, &[0.0, 0.0], |_| !progress.is_cancelled())
                {
                    Ok(result) => result,
                    Err(err) => {
                        log::debug!("texel {t}: normal refinement failed: {err}");
                        report.divergent_texels = 1;
                        return report;
                    }
                };
                if result.termination_reason == TerminationReason::UnsuccessfulLimit {
                    report.divergent_texels = 1;
                }

                let refined = frame.to_tangent(problem.normal_at(&result.params));
                if refined.z <= 0.0 {
                    report.rejected_texels = 1;
                    return report;
                }
                let refined = refined.normalize();
                out[0] = refined.x as f32;
                out[1] = refined.y as f32;
                out[2] = refined.z as f32;
                report
            })
            .reduce(NormalRefinementReport::default, NormalRefinementReport::merge);

        if progress.is_cancelled() {
            return Err(FitError::Cancelled { stage: STAGE });
        }
        if report.divergent_texels > 0 {
            log::warn!(
                "{} of {} texels failed normal refinement",
                report.divergent_texels,
                report.refined_texels
            );
        }
        Ok(report)
    }

    /// Smooth the normal map with the configured number of passes.
    ///
    /// Each pass adds the previous pass's covered 8-neighbours to the refined
    /// normal of the texel and renormalizes.
    pub fn smooth(&self, capture: &Capture, normals: &mut Image<f32, 3>) -> Result<(), FitError> {
        FitError::check_size(STAGE, "normal map", capture.texture_size(), normals.size())?;
        let size = normals.size();
        let (w, h) = (size.width as i64, size.height as i64);
        let refined = normals.clone();

        for _ in 0..self.settings.normal_smoothing_iterations {
            let prev = normals.clone();
            let src = prev.as_slice();
            normals
                .as_slice_mut()
                .par_chunks_exact_mut(3)
                .enumerate()
                .for_each(|(t, out)| {
                    if !capture.geometry.is_covered(t) {
                        return;
                    }
                    let (x, y) = ((t % size.width) as i64, (t / size.width) as i64);
                    let own = &refined.as_slice()[t * 3..t * 3 + 3];
                    let mut sum = DVec3::new(own[0] as f64, own[1] as f64, own[2] as f64);
                    for (dx, dy) in NEIGHBOURS {
                        let (nx, ny) = (x + dx, y + dy);
                        if nx < 0 || ny < 0 || nx >= w || ny >= h {
                            continue;
                        }
                        let nt = (ny * w + nx) as usize;
                        if capture.geometry.is_covered(nt) {
                            let n = &src[nt * 3..nt * 3 + 3];
                            sum += DVec3::new(n[0] as f64, n[1] as f64, n[2] as f64);
                        }
                    }
                    let n = sum.normalize_or(DVec3::Z);
                    out[0] = n.x as f32;
                    out[1] = n.y as f32;
                    out[2] = n.z as f32;
                });
        }
        Ok(())
    }
}

/// Offsets of the 8-neighbourhood.
pub(crate) const NEIGHBOURS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];
