use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use glam::DVec3;
use rayon::prelude::*;
use specfit_image::{color::srgb_from_linear, Image};

use crate::accumulator::{ErrorDomain, ErrorSums, ResidualAccumulator};
use crate::capture::Capture;
use crate::diagnostics::FitDiagnostics;
use crate::error::FitError;
use crate::model::{ReconstructionMethod, ReflectanceModel};
use crate::progress::ProgressMonitor;
use crate::render::ViewRenderer;
use crate::settings::ReconstructionSettings;

const STAGE: &str = "reconstruction";

/// Directory receiving the ground truth images of every rendered view.
pub const GROUND_TRUTH_DIR: &str = "groundTruth";

/// One `label, value` line of the RMSE report.
#[derive(Debug, Clone, PartialEq)]
pub struct RmseEntry {
    /// Metric label.
    pub label: String,
    /// Metric value; NaN when no pixel contributed.
    pub value: f64,
}

/// Linear and sRGB error of one method in one view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewRmse {
    /// Reconstruction method.
    pub method: ReconstructionMethod,
    /// View index in the reconstruction view set.
    pub view: usize,
    /// Pooled linear error sums of the view.
    pub linear: ErrorSums,
    /// Pooled sRGB error sums of the view.
    pub srgb: ErrorSums,
}

/// Every metric of a reconstruction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconstructionReport {
    /// Aggregate metrics, in report order.
    pub entries: Vec<RmseEntry>,
    /// Per-view metrics.
    pub views: Vec<ViewRmse>,
}

impl ReconstructionReport {
    /// Look up an aggregate metric by label.
    pub fn get(&self, label: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.label == label)
            .map(|e| e.value)
    }

    /// Aggregate RMSE of `method` in `domain`.
    pub fn rmse(&self, method: ReconstructionMethod, domain: ErrorDomain) -> Option<f64> {
        self.get(&format!("{}{}", method.label(), domain.suffix()))
    }

    fn push(&mut self, label: String, value: f64) {
        log::info!("{label}: {value:.6}");
        self.entries.push(RmseEntry { label, value });
    }

    /// Render the aggregate metrics as text, one `label, value` per line.
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for entry in &self.entries {
            let _ = writeln!(text, "{}, {}", entry.label, format_value(entry.value));
        }
        text
    }

    /// Per-view lines of `method`, `0003, v` then `0003 (sRGB), v`.
    pub fn view_text(&self, method: ReconstructionMethod) -> String {
        let mut text = String::new();
        for v in self.views.iter().filter(|v| v.method == method) {
            let _ = writeln!(text, "{:04}, {}", v.view, format_value(v.linear.rmse()));
            let _ = writeln!(
                text,
                "{:04}{}, {}",
                v.view,
                ErrorDomain::Srgb.suffix(),
                format_value(v.srgb.rmse())
            );
        }
        text
    }

    /// Write the aggregate metrics to `path`.
    pub fn write_rmse_file(&self, path: impl AsRef<Path>) -> Result<(), FitError> {
        write_text(path.as_ref(), &self.to_text())
    }
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else {
        value.to_string()
    }
}

fn write_text(path: &Path, text: &str) -> Result<(), FitError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(specfit_io::IoError::from)?;
    }
    std::fs::write(path, text).map_err(specfit_io::IoError::from)?;
    Ok(())
}

/// RMSE between a fitted tangent-space normal map and an encoded reference.
///
/// The reference stores `0.5 + 0.5 n` with alpha marking the texels that
/// take part. The error is the distance between unit vectors.
///
/// # Returns
///
/// NaN when no reference texel is valid.
pub fn normal_map_rmse(
    reference: &Image<f32, 4>,
    normals: &Image<f32, 3>,
) -> Result<f64, FitError> {
    FitError::check_size(STAGE, "normal map", reference.size(), normals.size())?;
    let sums = reference
        .as_slice()
        .par_chunks_exact(4)
        .zip(normals.as_slice().par_chunks_exact(3))
        .filter(|(r, _)| r[3] > 0.0)
        .fold(ErrorSums::default, |mut acc, (r, n)| {
            let expected = DVec3::new(
                2.0 * r[0] as f64 - 1.0,
                2.0 * r[1] as f64 - 1.0,
                2.0 * r[2] as f64 - 1.0,
            )
            .normalize_or_zero();
            let fitted = DVec3::new(n[0] as f64, n[1] as f64, n[2] as f64).normalize_or_zero();
            acc.add((expected - fitted).length_squared(), 1.0);
            acc
        })
        .reduce(ErrorSums::default, ErrorSums::merge);
    Ok(sums.rmse())
}

fn srgb_rgba(rgb: &Image<f32, 3>, weight: &Image<f32, 1>) -> Image<f32, 4> {
    let width = rgb.width();
    let (data, weight) = (rgb.as_slice(), weight.as_slice());
    Image::from_fn(rgb.size(), |x, y| {
        let i = y * width + x;
        [
            srgb_from_linear(data[3 * i]),
            srgb_from_linear(data[3 * i + 1]),
            srgb_from_linear(data[3 * i + 2]),
            if weight[i] > 0.0 { 1.0 } else { 0.0 },
        ]
    })
}

/// Re-renders calibration views from a finished fit and reports fidelity.
pub struct FinalReconstruction<'a> {
    settings: &'a ReconstructionSettings,
    renderer: &'a dyn ViewRenderer,
}

impl<'a> FinalReconstruction<'a> {
    /// Create the stage with the renderer it draws views with.
    pub fn new(settings: &'a ReconstructionSettings, renderer: &'a dyn ViewRenderer) -> Self {
        Self { settings, renderer }
    }

    /// Views taking part: every view, or only the primary one.
    pub fn views(&self, capture: &Capture) -> Vec<usize> {
        if self.settings.reconstruct_all {
            (0..capture.view_set.len()).collect()
        } else {
            vec![capture.view_set.primary_view()]
        }
    }

    /// Render and compare every method over the selected views.
    ///
    /// Aggregates pool the error sums of all views. When `output_dir` is
    /// given and every view is reconstructed, the rendered images, the
    /// ground truth and the per-view RMSE files are written below it; write
    /// failures are recorded in `diagnostics` and never abort the stage.
    ///
    /// # Arguments
    ///
    /// * `capture` - The reconstruction capture, sharing the fit's texture raster.
    /// * `model` - The fitted model.
    /// * `output_dir` - Optional artifact directory.
    /// * `diagnostics` - Receives artifact failures.
    /// * `progress` - Notified after every rendered view.
    pub fn run(
        &self,
        capture: &Capture,
        model: &ReflectanceModel<'_>,
        output_dir: Option<&Path>,
        diagnostics: &mut FitDiagnostics,
        progress: &dyn ProgressMonitor,
    ) -> Result<ReconstructionReport, FitError> {
        model.solution().check(STAGE, capture.texture_size())?;
        let views = self.views(capture);
        let write_dir = output_dir.filter(|_| self.settings.reconstruct_all);
        let linear = ResidualAccumulator::new(ErrorDomain::Linear);
        let srgb = ResidualAccumulator::new(ErrorDomain::Srgb);

        let mut report = ReconstructionReport::default();
        let mut ground_truth_written = vec![false; capture.view_set.len()];
        let total = (ReconstructionMethod::ALL.len() * views.len()).max(1);
        let mut done = 0;

        for method in ReconstructionMethod::ALL {
            let mut pooled_linear = ErrorSums::default();
            let mut pooled_srgb = ErrorSums::default();
            for &v in &views {
                if progress.is_cancelled() {
                    return Err(FitError::Cancelled { stage: STAGE });
                }
                let rendered = self.renderer.render(capture, model, method, v)?;
                let view_linear = linear.accumulate_view(&rendered)?;
                let view_srgb = srgb.accumulate_view(&rendered)?;
                log::debug!(
                    "{} view {v}: rmse {:.6}, sRGB {:.6}",
                    method.label(),
                    view_linear.rmse(),
                    view_srgb.rmse()
                );
                pooled_linear = pooled_linear.merge(view_linear);
                pooled_srgb = pooled_srgb.merge(view_srgb);
                report.views.push(ViewRmse {
                    method,
                    view: v,
                    linear: view_linear,
                    srgb: view_srgb,
                });

                if let Some(dir) = write_dir {
                    if let Some(subdir) = method.directory() {
                        save_view(
                            &dir.join(subdir),
                            v,
                            &rendered.prediction,
                            &rendered.weight,
                            diagnostics,
                        );
                    }
                    if !ground_truth_written[v] {
                        save_view(
                            &dir.join(GROUND_TRUTH_DIR),
                            v,
                            &rendered.ground_truth,
                            &rendered.weight,
                            diagnostics,
                        );
                        ground_truth_written[v] = true;
                    }
                }

                done += 1;
                progress.on_progress(done as f64 / total as f64);
            }
            report.push(method.label().to_string(), pooled_linear.rmse());
            report.push(
                format!("{}{}", method.label(), ErrorDomain::Srgb.suffix()),
                pooled_srgb.rmse(),
            );

            if let (Some(dir), Some(subdir)) = (write_dir, method.directory()) {
                let path = dir.join(subdir).join("rmse.txt");
                if let Err(err) = write_text(&path, &report.view_text(method)) {
                    diagnostics.record_io_failure(STAGE, path.display().to_string(), err);
                }
            }
        }

        if let Some(reference) = &capture.reference_normals {
            report.push(
                "normal".to_string(),
                normal_map_rmse(reference, &model.solution().material.normal)?,
            );
        }

        Ok(report)
    }
}

fn view_path(dir: &Path, view: usize) -> PathBuf {
    dir.join(format!("{view:04}.png"))
}

// sRGB colour with the validity as alpha
fn save_view(
    dir: &Path,
    view: usize,
    rgb: &Image<f32, 3>,
    weight: &Image<f32, 1>,
    diagnostics: &mut FitDiagnostics,
) {
    let path = view_path(dir, view);
    let result = std::fs::create_dir_all(dir)
        .map_err(specfit_io::IoError::from)
        .and_then(|_| {
            specfit_io::functional::write_image_f32_rgba(
                &path,
                &srgb_rgba(rgb, weight),
            )
        });
    if let Err(err) = result {
        diagnostics.record_io_failure(STAGE, path.display().to_string(), err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sums(sum_squared_error: f64, sum_weight: f64) -> ErrorSums {
        ErrorSums {
            sum_squared_error,
            sum_weight,
            count: 1,
        }
    }

    #[test]
    fn report_lines_and_nan() -> Result<(), FitError> {
        let mut report = ReconstructionReport::default();
        report.push("basis".to_string(), 0.25);
        report.push("basis (sRGB)".to_string(), f64::NAN);
        assert_eq!(report.to_text(), "basis, 0.25\nbasis (sRGB), NaN\n");
        assert_eq!(report.rmse(ReconstructionMethod::Basis, ErrorDomain::Linear), Some(0.25));

        report.views.push(ViewRmse {
            method: ReconstructionMethod::Basis,
            view: 3,
            linear: sums(4.0, 1.0),
            srgb: sums(0.0, 0.0),
        });
        assert_eq!(
            report.view_text(ReconstructionMethod::Basis),
            "0003, 2\n0003 (sRGB), NaN\n"
        );
        assert!(report.view_text(ReconstructionMethod::Ggx).is_empty());

        let tmp_dir = tempfile::tempdir().map_err(specfit_io::IoError::from)?;
        let path = tmp_dir.path().join("nested").join("rmse.txt");
        report.write_rmse_file(&path)?;
        let text = std::fs::read_to_string(&path).map_err(specfit_io::IoError::from)?;
        assert_eq!(text, report.to_text());
        Ok(())
    }

    #[test]
    fn normal_rmse_skips_invalid_texels() -> Result<(), FitError> {
        // texel 0 matches, texel 1 is orthogonal, texel 2 is masked out
        let reference = Image::<f32, 4>::new(
            [3, 1].into(),
            vec![
                0.5, 0.5, 1.0, 1.0, //
                0.5, 0.5, 1.0, 1.0, //
                1.0, 0.5, 0.5, 0.0,
            ],
        )?;
        let normals = Image::<f32, 3>::new(
            [3, 1].into(),
            vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
        )?;
        let rmse = normal_map_rmse(&reference, &normals)?;
        // mean of 0 and |z − x|² = 2
        assert_relative_eq!(rmse, 1.0, epsilon = 1e-6);

        let none = Image::<f32, 4>::from_size_val([3, 1].into(), 0.0)?;
        assert!(normal_map_rmse(&none, &normals)?.is_nan());
        Ok(())
    }
}
