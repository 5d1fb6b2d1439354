//! Immutable configuration of a fit run.
//!
//! A [`FitSettings`] value is built once, validated, and then only borrowed by
//! the stages. Every struct deserializes with defaults for missing fields, so
//! a settings file only needs to name what it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::FitError;

/// How the per-texel weights are seeded before the first basis update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeightInitialization {
    /// Every basis gets `1 / basis_count`.
    Uniform,
    /// One-hot weights from k-means clustering of average reflectance.
    #[default]
    KMeans,
}

/// Settings of the basis decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecularBasisSettings {
    /// Number of global basis functions.
    pub basis_count: usize,
    /// Number of angular steps of each basis table.
    pub basis_resolution: usize,
    /// Narrowest lobe support, as a fraction of the resolution.
    pub specular_min_width_frac: f64,
    /// Widest smoothstep ramp, as a fraction of the resolution.
    pub specular_max_width_frac: f64,
    /// Number of library functions, as a fraction of the admissible lobe widths.
    pub basis_complexity_frac: f64,
    /// Fraction of the constant term that behaves like a flat specular floor.
    pub metallicity: f64,
    /// Use the V-cavity masking-shadowing term instead of a constant one.
    pub masking_shadowing_enabled: bool,
    /// Stop when the relative RMSE improvement of an iteration falls below this.
    pub convergence_tolerance: f64,
    /// Upper bound on alternations.
    pub max_iterations: usize,
    /// Constrain each weight vector to sum to one.
    pub weights_sum_to_one: bool,
    /// Weight seeding strategy.
    pub weight_initialization: WeightInitialization,
    /// Estimate a per-texel constant (translucency) term with the final diffuse.
    pub constant_term_enabled: bool,
}

impl Default for SpecularBasisSettings {
    fn default() -> Self {
        Self {
            basis_count: 8,
            basis_resolution: 90,
            specular_min_width_frac: 0.2,
            specular_max_width_frac: 1.0,
            basis_complexity_frac: 1.0,
            metallicity: 0.0,
            masking_shadowing_enabled: true,
            convergence_tolerance: 1e-4,
            max_iterations: 64,
            weights_sum_to_one: true,
            weight_initialization: WeightInitialization::KMeans,
            constant_term_enabled: false,
        }
    }
}

impl SpecularBasisSettings {
    /// Narrowest lobe support in bins, at least one.
    pub fn min_width(&self) -> usize {
        ((self.specular_min_width_frac * self.basis_resolution as f64).round() as usize).max(1)
    }

    /// Widest smoothstep ramp in bins, at least [`Self::min_width`].
    pub fn max_width(&self) -> usize {
        ((self.specular_max_width_frac * self.basis_resolution as f64).round() as usize)
            .max(self.min_width())
    }

    /// Number of library functions each basis is built from.
    pub fn basis_complexity(&self) -> usize {
        let admissible = (self.basis_resolution + 1).saturating_sub(self.min_width());
        ((self.basis_complexity_frac * admissible as f64).round() as usize).max(1)
    }
}

/// Settings of the per-texel normal refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalOptimizationSettings {
    /// Refine normals at all.
    pub enabled: bool,
    /// Run the adaptive Levenberg-Marquardt loop; otherwise a single damped step.
    pub levenberg_marquardt_enabled: bool,
    /// Floor for the damping factor.
    pub min_normal_damping: f64,
    /// Neighbourhood smoothing passes after refinement.
    pub normal_smoothing_iterations: usize,
    /// Consecutive rejected steps before a texel gives up.
    pub unsuccessful_lm_iterations_allowed: usize,
    /// Upper bound on LM iterations per texel.
    pub max_lm_iterations: usize,
    /// Relative cost improvement below which a texel is converged.
    pub convergence_tolerance: f64,
}

impl Default for NormalOptimizationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            levenberg_marquardt_enabled: true,
            min_normal_damping: 1.0,
            normal_smoothing_iterations: 0,
            unsuccessful_lm_iterations_allowed: 8,
            max_lm_iterations: 32,
            convergence_tolerance: 1e-6,
        }
    }
}

/// Settings of the final reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionSettings {
    /// Run the reconstruction stage.
    pub enabled: bool,
    /// Render every view and write images; otherwise only the primary view.
    pub reconstruct_all: bool,
}

impl Default for ReconstructionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            reconstruct_all: false,
        }
    }
}

/// Settings of the output artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Pack up to four weights per RGBA image instead of one gray image per basis.
    pub combine_weights: bool,
    /// Dilation passes filling unobserved texels.
    pub hole_fill_passes: usize,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            combine_weights: true,
            hole_fill_passes: 16,
        }
    }
}

/// The complete configuration of a fit run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FitSettings {
    /// Basis decomposition.
    pub specular: SpecularBasisSettings,
    /// Normal refinement.
    pub normal: NormalOptimizationSettings,
    /// Final reconstruction.
    pub reconstruction: ReconstructionSettings,
    /// Output artifacts.
    pub export: ExportSettings,
}

impl FitSettings {
    /// Read settings from a json file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, FitError> {
        let file = std::fs::File::open(path.as_ref()).map_err(specfit_io::IoError::from)?;
        let settings: FitSettings = serde_json::from_reader(std::io::BufReader::new(file))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write settings to a json file.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<(), FitError> {
        let file = std::fs::File::create(path.as_ref()).map_err(specfit_io::IoError::from)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    /// Reject settings that cannot produce a fit.
    pub fn validate(&self) -> Result<(), FitError> {
        let s = &self.specular;
        let invalid = |msg: String| Err(FitError::InvalidSettings(msg));

        if s.basis_count == 0 {
            return invalid("basis_count must be at least 1".to_string());
        }
        if s.basis_resolution < 2 {
            return invalid(format!(
                "basis_resolution must be at least 2, got {}",
                s.basis_resolution
            ));
        }
        for (name, value) in [
            ("specular_min_width_frac", s.specular_min_width_frac),
            ("specular_max_width_frac", s.specular_max_width_frac),
            ("basis_complexity_frac", s.basis_complexity_frac),
        ] {
            if !(value.is_finite() && value > 0.0 && value <= 1.0) {
                return invalid(format!("{name} must be in (0, 1], got {value}"));
            }
        }
        if s.specular_min_width_frac > s.specular_max_width_frac {
            return invalid(format!(
                "specular_min_width_frac ({}) exceeds specular_max_width_frac ({})",
                s.specular_min_width_frac, s.specular_max_width_frac
            ));
        }
        if !(0.0..=1.0).contains(&s.metallicity) {
            return invalid(format!("metallicity must be in [0, 1], got {}", s.metallicity));
        }
        if !(s.convergence_tolerance.is_finite() && s.convergence_tolerance >= 0.0) {
            return invalid(format!(
                "convergence_tolerance must be non-negative, got {}",
                s.convergence_tolerance
            ));
        }

        let n = &self.normal;
        if !(n.min_normal_damping.is_finite() && n.min_normal_damping > 0.0) {
            return invalid(format!(
                "min_normal_damping must be positive, got {}",
                n.min_normal_damping
            ));
        }
        if !(n.convergence_tolerance.is_finite() && n.convergence_tolerance >= 0.0) {
            return invalid(format!(
                "normal convergence_tolerance must be non-negative, got {}",
                n.convergence_tolerance
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() -> Result<(), FitError> {
        FitSettings::default().validate()
    }

    #[test]
    fn derived_widths() {
        let s = SpecularBasisSettings {
            basis_resolution: 90,
            specular_min_width_frac: 0.2,
            specular_max_width_frac: 0.5,
            basis_complexity_frac: 0.5,
            ..Default::default()
        };
        assert_eq!(s.min_width(), 18);
        assert_eq!(s.max_width(), 45);
        assert_eq!(s.basis_complexity(), 37);

        let tiny = SpecularBasisSettings {
            basis_resolution: 4,
            specular_min_width_frac: 0.01,
            specular_max_width_frac: 0.01,
            ..Default::default()
        };
        assert_eq!(tiny.min_width(), 1);
        assert_eq!(tiny.max_width(), 1);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let mut settings = FitSettings::default();
        settings.specular.basis_count = 0;
        assert!(matches!(settings.validate(), Err(FitError::InvalidSettings(_))));

        let mut settings = FitSettings::default();
        settings.specular.specular_min_width_frac = 0.8;
        settings.specular.specular_max_width_frac = 0.4;
        assert!(settings.validate().is_err());

        let mut settings = FitSettings::default();
        settings.normal.min_normal_damping = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn json_round_trip_with_partial_file() -> Result<(), FitError> {
        let tmp_dir = tempfile::tempdir().map_err(specfit_io::IoError::from)?;
        let path = tmp_dir.path().join("settings.json");
        let json = r#"{ "specular": { "basis_count": 3 }, "normal": { "enabled": true } }"#;
        std::fs::write(&path, json).map_err(specfit_io::IoError::from)?;

        let settings = FitSettings::from_json_file(&path)?;
        assert_eq!(settings.specular.basis_count, 3);
        assert_eq!(settings.specular.basis_resolution, 90);
        assert!(settings.normal.enabled);

        let out = tmp_dir.path().join("out.json");
        settings.to_json_file(&out)?;
        assert_eq!(FitSettings::from_json_file(&out)?, settings);
        Ok(())
    }
}
