use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use specfit_image::Image;

use crate::capture::Capture;
use crate::decomposition::BasisDecomposition;
use crate::diagnostics::FitDiagnostics;
use crate::diffuse::estimate_final_diffuse;
use crate::error::FitError;
use crate::export::save_fit;
use crate::hole_fill::{dilate, dilate_image};
use crate::material::{FitSolution, MaterialEstimate};
use crate::model::ReflectanceModel;
use crate::normal::NormalRefinement;
use crate::progress::{NoProgress, ProgressMonitor};
use crate::reconstruction::{FinalReconstruction, ReconstructionReport};
use crate::render::{TexelSplatRenderer, ViewRenderer};
use crate::roughness::RoughnessFit;
use crate::samples::SampleTable;
use crate::settings::FitSettings;
use crate::weights::WeightMap;

/// Everything a finished fit produced.
#[derive(Debug, Clone)]
pub struct FitOutput {
    /// The fitted basis, weights and material maps.
    pub solution: FitSolution,
    /// Reconstruction metrics, when reconstruction is enabled.
    pub report: Option<ReconstructionReport>,
    /// Locally recovered failures.
    pub diagnostics: FitDiagnostics,
    /// Fitting RMSE before the first alternation and after each one.
    pub error_history: Vec<f64>,
    /// Artifacts written to the output directory.
    pub written: Vec<PathBuf>,
}

/// Runs every stage of a fit in order.
///
/// # Example
///
/// ```no_run
/// use specfit::synthetic::SyntheticScene;
/// use specfit::{FitSettings, SpecularFitPipeline};
///
/// let capture = SyntheticScene::default().build()?;
/// let output = SpecularFitPipeline::new(FitSettings::default()).run(&capture, None, None)?;
/// println!("{}", output.report.map(|r| r.to_text()).unwrap_or_default());
/// # Ok::<(), specfit::FitError>(())
/// ```
pub struct SpecularFitPipeline {
    settings: FitSettings,
    progress: Arc<dyn ProgressMonitor>,
    renderer: Box<dyn ViewRenderer>,
}

impl SpecularFitPipeline {
    /// Create a pipeline with the texel splatting renderer and no progress reporting.
    pub fn new(settings: FitSettings) -> Self {
        Self {
            settings,
            progress: Arc::new(NoProgress),
            renderer: Box::new(TexelSplatRenderer),
        }
    }

    /// Report progress to, and poll cancellation from, `progress`.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressMonitor>) -> Self {
        self.progress = progress;
        self
    }

    /// Render reconstructions with `renderer`.
    pub fn with_renderer(mut self, renderer: Box<dyn ViewRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// The settings of every run.
    pub fn settings(&self) -> &FitSettings {
        &self.settings
    }

    fn stage<T>(&self, name: &str, f: impl FnOnce() -> Result<T, FitError>) -> Result<T, FitError> {
        self.progress.on_stage(name);
        let start = Instant::now();
        let result = f();
        log::info!("{name} took {:?}", start.elapsed());
        result
    }

    /// Fit `capture` and optionally reconstruct and export the result.
    ///
    /// # Arguments
    ///
    /// * `capture` - The fitting capture.
    /// * `reconstruction` - Views to reconstruct; the fitting capture when `None`.
    /// * `output_dir` - Directory receiving the artifacts; nothing is written when `None`.
    ///
    /// # Errors
    ///
    /// Invalid settings, mismatched inputs, a capture without any usable
    /// observation and cancellation stop the fit. Artifact write failures
    /// do not; they are listed in [`FitOutput::diagnostics`].
    pub fn run(
        &self,
        capture: &Capture,
        reconstruction: Option<&Capture>,
        output_dir: Option<&Path>,
    ) -> Result<FitOutput, FitError> {
        let start = Instant::now();
        let settings = &self.settings;
        let specular = &settings.specular;
        let progress = self.progress.as_ref();
        settings.validate()?;
        capture.validate()?;

        let size = capture.texture_size();
        let mut diagnostics = FitDiagnostics::default();
        let mut normals = match &capture.baseline_normals {
            Some(normals) => normals.clone(),
            None => Image::from_fn(size, |_, _| [0.0, 0.0, 1.0]),
        };
        let build_samples = |normals: &Image<f32, 3>| {
            SampleTable::build(
                capture,
                normals,
                specular.basis_resolution,
                specular.masking_shadowing_enabled,
            )
        };

        let mut samples = self.stage("sampling", || build_samples(&normals))?;
        let engine = BasisDecomposition::new(specular);
        let refinement = NormalRefinement::new(&settings.normal, specular);

        let state = self.stage("basis decomposition", || {
            let mut state = engine.initialize(&samples, size)?;
            if !settings.normal.enabled {
                engine.run(&samples, &mut state, progress)?;
                return Ok(state);
            }
            while state.iteration < specular.max_iterations {
                if progress.is_cancelled() {
                    return Err(FitError::Cancelled {
                        stage: "basis decomposition",
                    });
                }
                engine.step(&samples, &mut state)?;
                let mut refined = normals.clone();
                let report = refinement.refine(
                    capture,
                    &state.basis,
                    &state.weights,
                    &mut refined,
                    progress,
                )?;
                diagnostics.divergent_normal_texels += report.divergent_texels;

                // refined normals can move samples across the horizon, so they
                // are kept only when the fitting error does not grow
                let refined_samples = build_samples(&refined)?;
                let error = engine
                    .fitting_error(&refined_samples, &state.basis, &state.weights)
                    .rmse();
                match state.error_history.last_mut() {
                    Some(last) if error <= *last => {
                        *last = error;
                        normals = refined;
                        samples = refined_samples;
                        log::debug!(
                            "iteration {}: rmse {error:.8} after normal refinement",
                            state.iteration
                        );
                    }
                    _ => log::debug!(
                        "iteration {}: normal refinement rejected, rmse {error:.8}",
                        state.iteration
                    ),
                }
                progress.on_progress(state.iteration as f64 / specular.max_iterations as f64);
                if engine.has_converged(&state) {
                    break;
                }
            }
            Ok(state)
        })?;
        diagnostics.degenerate_weight_texels = state.degenerate_texels;

        if settings.normal.enabled && settings.normal.normal_smoothing_iterations > 0 {
            samples = self.stage("normal smoothing", || {
                refinement.smooth(capture, &mut normals)?;
                build_samples(&normals)
            })?;
        }

        let mut weights = state.weights;
        let basis = state.basis;
        let estimate = self.stage("final diffuse", || {
            estimate_final_diffuse(&samples, &basis, &weights, specular.constant_term_enabled)
        })?;
        let (mut specular_map, mut roughness) = self.stage("roughness", || {
            RoughnessFit::new(specular.basis_resolution).fit(&basis, &weights)
        })?;

        let mut diffuse = estimate.diffuse;
        let mut constant = estimate.constant;
        self.stage("hole filling", || {
            let coverage: Vec<bool> = (0..size.num_pixels())
                .map(|t| capture.geometry.is_covered(t))
                .collect();
            diagnostics.unobserved_texels = coverage
                .iter()
                .zip(&estimate.observed)
                .filter(|(&c, &o)| c && !o)
                .count();
            if diagnostics.unobserved_texels == 0 {
                return Ok(());
            }
            let passes = settings.export.hole_fill_passes;
            let mut valid = estimate.observed.clone();
            diagnostics.filled_texels = fill_weights(&mut weights, &mut valid, &coverage, passes);
            dilate_image(&mut diffuse, &estimate.observed, &coverage, passes);
            dilate_image(&mut specular_map, &estimate.observed, &coverage, passes);
            dilate_image(&mut roughness, &estimate.observed, &coverage, passes);
            if let Some(constant) = constant.as_mut() {
                dilate_image(constant, &estimate.observed, &coverage, passes);
            }
            log::info!(
                "filled {} of {} unobserved texels",
                diagnostics.filled_texels,
                diagnostics.unobserved_texels
            );
            Ok(())
        })?;

        let solution = FitSolution {
            basis,
            weights,
            material: MaterialEstimate {
                diffuse,
                normal: normals,
                specular: specular_map,
                roughness,
                constant,
            },
        };
        solution.check("pipeline", size)?;

        let report = if settings.reconstruction.enabled {
            let target = reconstruction.unwrap_or(capture);
            let model = ReflectanceModel::new(
                &solution,
                specular.metallicity,
                specular.masking_shadowing_enabled,
            );
            let stage = FinalReconstruction::new(&settings.reconstruction, self.renderer.as_ref());
            Some(self.stage("reconstruction", || {
                stage.run(target, &model, output_dir, &mut diagnostics, progress)
            })?)
        } else {
            None
        };

        let mut written = Vec::new();
        if let Some(dir) = output_dir {
            written = self.stage("export", || {
                Ok(save_fit(dir, &solution, settings, &mut diagnostics))
            })?;
            if let Some(report) = &report {
                let path = dir.join("rmse.txt");
                match report.write_rmse_file(&path) {
                    Ok(()) => written.push(path),
                    Err(err) => {
                        diagnostics.record_io_failure("export", path.display().to_string(), err)
                    }
                }
            }
        }

        diagnostics.log_summary();
        log::info!("fit finished in {:?}", start.elapsed());
        progress.on_complete();

        Ok(FitOutput {
            solution,
            report,
            diagnostics,
            error_history: state.error_history,
            written,
        })
    }
}

fn fill_weights(
    weights: &mut WeightMap,
    valid: &mut [bool],
    coverage: &[bool],
    passes: usize,
) -> usize {
    let (size, count) = (weights.size(), weights.count());
    dilate(weights.as_slice_mut(), count, size, valid, coverage, passes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::LogProgress;
    use crate::synthetic::SyntheticScene;

    fn small_settings() -> FitSettings {
        let mut settings = FitSettings::default();
        settings.specular.basis_count = 2;
        settings.specular.basis_resolution = 16;
        settings.specular.max_iterations = 6;
        settings
    }

    #[test]
    fn invalid_settings_are_rejected() -> Result<(), FitError> {
        let capture = SyntheticScene {
            texture_size: [2, 2].into(),
            ..Default::default()
        }
        .build()?;
        let mut settings = small_settings();
        settings.specular.basis_count = 0;
        let result = SpecularFitPipeline::new(settings).run(&capture, None, None);
        assert!(matches!(result, Err(FitError::InvalidSettings(_))));
        Ok(())
    }

    #[test]
    fn cancelled_before_decomposition() -> Result<(), FitError> {
        let capture = SyntheticScene {
            texture_size: [2, 2].into(),
            ..Default::default()
        }
        .build()?;
        let progress = Arc::new(LogProgress::new());
        progress.cancel();
        let result = SpecularFitPipeline::new(small_settings())
            .with_progress(progress)
            .run(&capture, None, None);
        assert!(matches!(result, Err(FitError::Cancelled { .. })));
        Ok(())
    }

    #[test]
    fn unobserved_texels_are_filled() -> Result<(), FitError> {
        let mut capture = SyntheticScene {
            texture_size: [4, 1].into(),
            ..Default::default()
        }
        .build()?;
        for obs in &mut capture.observations {
            obs.weight.as_slice_mut()[3] = 0.0;
        }

        let output = SpecularFitPipeline::new(small_settings()).run(&capture, None, None)?;
        assert_eq!(output.diagnostics.unobserved_texels, 1);
        assert_eq!(output.diagnostics.filled_texels, 1);
        let w = output.solution.weights.texel(3);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-6);
        assert!(output.report.is_some());
        Ok(())
    }
}
