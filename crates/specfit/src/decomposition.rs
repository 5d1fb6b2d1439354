//! Alternating nonnegative decomposition of the observations into a global
//! basis and per-texel weights.
//!
//! Each alternation first solves the basis with the weights fixed, then the
//! weights with the basis fixed. Both sub-problems are nonnegative least
//! squares over the same weighted objective, so the fitting RMSE never
//! increases from one alternation to the next.

use std::f64::consts::{FRAC_1_PI, PI};

use rayon::prelude::*;
use specfit_algebra::{NnlsError, NonNegativeLeastSquares, NormalEquations};
use specfit_image::ImageSize;

use crate::accumulator::ErrorSums;
use crate::basis::{BasisSet, SmoothStepLibrary};
use crate::error::FitError;
use crate::initialization::initial_weights;
use crate::progress::ProgressMonitor;
use crate::samples::{FitSample, SampleTable};
use crate::settings::SpecularBasisSettings;
use crate::weights::WeightMap;

const STAGE: &str = "basis decomposition";

/// Mutable state of the alternation, owned by the decomposition stage.
#[derive(Debug, Clone)]
pub struct DecompositionState {
    /// Current basis.
    pub basis: BasisSet,
    /// Current weights.
    pub weights: WeightMap,
    /// Completed alternations.
    pub iteration: usize,
    /// Fitting RMSE before the first alternation and after each one.
    pub error_history: Vec<f64>,
    /// Texels whose last weight solve was all zero.
    pub degenerate_texels: usize,
}

impl DecompositionState {
    /// The most recent fitting RMSE.
    pub fn current_error(&self) -> f64 {
        self.error_history.last().copied().unwrap_or(f64::NAN)
    }
}

/// The basis decomposition engine.
pub struct BasisDecomposition<'a> {
    settings: &'a SpecularBasisSettings,
    library: SmoothStepLibrary,
    solver: NonNegativeLeastSquares,
}

impl<'a> BasisDecomposition<'a> {
    /// Create an engine for `settings`.
    pub fn new(settings: &'a SpecularBasisSettings) -> Self {
        Self {
            settings,
            library: SmoothStepLibrary::from_settings(settings),
            solver: NonNegativeLeastSquares::default(),
        }
    }

    /// The lobe library basis functions are built from.
    pub fn library(&self) -> &SmoothStepLibrary {
        &self.library
    }

    /// Seed weights and a zero basis, and record the initial error.
    ///
    /// Fails with [`FitError::InsufficientData`] when no texel has a usable sample.
    pub fn initialize(
        &self,
        samples: &SampleTable,
        size: ImageSize,
    ) -> Result<DecompositionState, FitError> {
        if samples.num_texels() != size.num_pixels() {
            return Err(FitError::CountMismatch {
                stage: STAGE,
                what: "texel sample lists",
                expected: size.num_pixels(),
                actual: samples.num_texels(),
            });
        }
        if samples.observed_count() == 0 {
            return Err(FitError::InsufficientData { stage: STAGE });
        }

        let s = self.settings;
        let weights = initial_weights(s.weight_initialization, samples, size, s.basis_count);
        let basis = BasisSet::zeros(s.basis_count, s.basis_resolution);
        let error = self.fitting_error(samples, &basis, &weights).rmse();
        log::info!(
            "decomposition: {} observed texels, {} library functions, initial rmse {error:.6}",
            samples.observed_count(),
            self.library.len()
        );

        Ok(DecompositionState {
            basis,
            weights,
            iteration: 0,
            error_history: vec![error],
            degenerate_texels: 0,
        })
    }

    /// Predicted radiance of one sample for a texel's weights.
    pub fn predict(&self, basis: &BasisSet, weights: &[f64], sample: &FitSample) -> [f64; 3] {
        let diffuse = basis.weighted_diffuse(weights);
        let specular = basis.weighted_specular(weights, sample.m);
        let mix = 1.0 - self.settings.metallicity;
        std::array::from_fn(|c| {
            sample.incident(c) * (diffuse[c] * FRAC_1_PI * mix + sample.geom * specular[c])
        })
    }

    /// Weighted squared error of every usable sample, channel averaged.
    pub fn fitting_error(
        &self,
        samples: &SampleTable,
        basis: &BasisSet,
        weights: &WeightMap,
    ) -> ErrorSums {
        samples
            .as_slice()
            .par_iter()
            .enumerate()
            .fold(ErrorSums::default, |mut acc, (t, texel)| {
                let w = weights.texel(t);
                for s in texel {
                    let p = self.predict(basis, w, s);
                    let e2 = (0..3).map(|c| (p[c] - s.radiance[c]).powi(2)).sum::<f64>() / 3.0;
                    acc.add(e2, s.weight);
                }
                acc
            })
            .reduce(ErrorSums::default, ErrorSums::merge)
    }

    /// Solve every basis function with the weights fixed.
    ///
    /// Per channel the unknowns are one constant per basis followed by
    /// `library.len()` lobe coefficients per basis, all nonnegative.
    pub fn update_basis(
        &self,
        samples: &SampleTable,
        weights: &WeightMap,
    ) -> Result<BasisSet, FitError> {
        let b_count = weights.count();
        let k_count = self.library.len();
        let dim = b_count * (1 + k_count);
        let mu = self.settings.metallicity;
        let empty =
            || -> [NormalEquations; 3] { std::array::from_fn(|_| NormalEquations::new(dim)) };

        let systems = samples
            .as_slice()
            .par_iter()
            .enumerate()
            .with_min_len(64)
            .fold(empty, |mut acc, (t, texel)| {
                let w = weights.texel(t);
                let mut entries = Vec::with_capacity(dim);
                let mut lobes = vec![0.0; k_count];
                for s in texel {
                    lobes
                        .iter_mut()
                        .enumerate()
                        .for_each(|(k, v)| *v = self.library.value_at(k, s.m));
                    for (c, eq) in acc.iter_mut().enumerate() {
                        entries.clear();
                        let e = s.incident(c);
                        for (b, &wb) in w.iter().enumerate().filter(|(_, &wb)| wb > 0.0) {
                            entries.push((b, e * wb * ((1.0 - mu) + mu * s.geom)));
                            for (k, &v) in lobes.iter().enumerate().filter(|(_, &v)| v != 0.0) {
                                entries.push((b_count + b * k_count + k, e * wb * s.geom * v));
                            }
                        }
                        eq.add_sparse_row(&entries, s.radiance[c], s.weight);
                    }
                }
                acc
            })
            .reduce(empty, |a, b| {
                let [a0, a1, a2] = a;
                [a0.merge(&b[0]), a1.merge(&b[1]), a2.merge(&b[2])]
            });

        let solutions = systems
            .par_iter()
            .map(|eq| self.solver.solve(eq).map(|sol| sol.x))
            .collect::<Result<Vec<_>, NnlsError>>()?;

        let resolution = self.settings.basis_resolution;
        let mut basis = BasisSet::zeros(b_count, resolution);
        for b in 0..b_count {
            let constant: [f64; 3] = std::array::from_fn(|c| solutions[c][b]);
            let table = (0..=resolution)
                .map(|i| {
                    std::array::from_fn(|c| {
                        let start = b_count + b * k_count;
                        let coeffs = &solutions[c][start..start + k_count];
                        coeffs
                            .iter()
                            .enumerate()
                            .map(|(k, g)| g * self.library.function(k)[i])
                            .sum::<f64>()
                            + mu * constant[c]
                    })
                })
                .collect();
            basis.set(b, constant.map(|a| PI * a), table);
        }
        Ok(basis)
    }

    /// Solve every texel's weights with the basis fixed.
    ///
    /// Texels without samples keep their weights. Returns the number of
    /// texels whose solve came back all zero; those keep their previous
    /// weights when weights must sum to one and become zero otherwise.
    pub fn update_weights(
        &self,
        samples: &SampleTable,
        basis: &BasisSet,
        weights: &mut WeightMap,
    ) -> Result<usize, FitError> {
        let count = weights.count();
        let sum_to_one = self.settings.weights_sum_to_one;
        if count == 1 && sum_to_one {
            weights.as_slice_mut().fill(1.0);
            return Ok(0);
        }
        let mix = 1.0 - self.settings.metallicity;

        let degenerate = weights
            .as_slice_mut()
            .par_chunks_mut(count)
            .zip(samples.as_slice().par_iter())
            .map(|(w, texel)| -> Result<bool, NnlsError> {
                if texel.is_empty() {
                    return Ok(false);
                }
                let mut eq = NormalEquations::new(count);
                let mut row = vec![0.0; count];
                for s in texel {
                    let lobes: Vec<[f64; 3]> =
                        (0..count).map(|b| basis.specular_at(b, s.m)).collect();
                    for c in 0..3 {
                        for (b, r) in row.iter_mut().enumerate() {
                            *r = s.incident(c)
                                * (basis.diffuse(b)[c] * FRAC_1_PI * mix + s.geom * lobes[b][c]);
                        }
                        eq.add_row(&row, s.radiance[c], s.weight);
                    }
                }

                let sol = if sum_to_one {
                    self.solver.solve_sum_to_one(&eq)?
                } else {
                    self.solver.solve(&eq)?
                };
                if sol.is_zero() {
                    if !sum_to_one {
                        w.fill(0.0);
                    }
                    return Ok(true);
                }
                w.copy_from_slice(&sol.x);
                Ok(false)
            })
            .collect::<Result<Vec<bool>, NnlsError>>()?
            .into_iter()
            .filter(|&d| d)
            .count();

        if degenerate > 0 {
            log::warn!("{degenerate} texels have degenerate weights");
        }
        Ok(degenerate)
    }

    /// One full alternation: basis update, weight update and error.
    pub fn step(
        &self,
        samples: &SampleTable,
        state: &mut DecompositionState,
    ) -> Result<f64, FitError> {
        state.basis = self.update_basis(samples, &state.weights)?;
        state.degenerate_texels = self.update_weights(samples, &state.basis, &mut state.weights)?;

        let error = self.fitting_error(samples, &state.basis, &state.weights).rmse();
        state.iteration += 1;
        state.error_history.push(error);
        log::debug!("decomposition iteration {}: rmse {error:.8}", state.iteration);
        Ok(error)
    }

    /// Whether the last alternation improved the error by less than the tolerance.
    pub fn has_converged(&self, state: &DecompositionState) -> bool {
        let [.., prev, cur] = state.error_history[..] else {
            return false;
        };
        prev <= 0.0 || prev - cur <= self.settings.convergence_tolerance * prev
    }

    /// Alternate until converged or the iteration cap is reached.
    ///
    /// Cancellation is checked before every alternation.
    pub fn run(
        &self,
        samples: &SampleTable,
        state: &mut DecompositionState,
        progress: &dyn ProgressMonitor,
    ) -> Result<(), FitError> {
        let max_iterations = self.settings.max_iterations;
        while state.iteration < max_iterations {
            if progress.is_cancelled() {
                return Err(FitError::Cancelled { stage: STAGE });
            }
            self.step(samples, state)?;
            progress.on_progress(state.iteration as f64 / max_iterations as f64);
            if self.has_converged(state) {
                log::info!(
                    "decomposition converged after {} iterations, rmse {:.6}",
                    state.iteration,
                    state.current_error()
                );
                break;
            }
        }
        Ok(())
    }
}
