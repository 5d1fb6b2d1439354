#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Error taxonomy of the fitting pipeline.
pub mod error;

/// Counters for locally recovered failures.
pub mod diagnostics;

/// Immutable run configuration.
pub mod settings;

/// Progress reporting and cooperative cancellation.
pub mod progress;

/// Calibrated cameras and lights.
pub mod view_set;

/// Texture-space surface geometry.
pub mod geometry;

/// Captured observations and the sources that produce them.
pub mod capture;

/// Per-sample shading geometry and analytic lobes.
pub mod shading;

/// Usable observation samples with resolved shading terms.
pub mod samples;

/// Basis functions and the smoothstep library they are built from.
pub mod basis;

/// Per-texel basis weights.
pub mod weights;

/// Fitted material maps and the complete fit solution.
pub mod material;

/// Evaluation of the fitted reflectance for reconstruction.
pub mod model;

/// Weighted squared error accumulation and RMSE.
pub mod accumulator;

/// Weight initialization by clustering average reflectance.
pub mod initialization;

/// Alternating nonnegative basis decomposition.
pub mod decomposition;

/// Per-texel Levenberg-Marquardt normal refinement.
pub mod normal;

/// Final per-texel diffuse and constant term estimation.
pub mod diffuse;

/// Conversion of the basis lobes to GGX reflectivity and roughness.
pub mod roughness;

/// Dilation of fitted maps into unobserved texels.
pub mod hole_fill;

/// Rendering of calibration views from a fitted model.
pub mod render;

/// Reconstruction of calibration views and RMSE reporting.
pub mod reconstruction;

/// Metallic-roughness base colour and ORM maps.
pub mod albedo_orm;

/// Output artifacts and their loading.
pub mod export;

/// glTF material document referencing the exported textures.
pub mod gltf;

/// End-to-end orchestration of a fit.
pub mod pipeline;

/// Synthetic captures for validation.
pub mod synthetic;

pub use crate::error::FitError;
pub use crate::pipeline::{FitOutput, SpecularFitPipeline};
pub use crate::settings::FitSettings;
