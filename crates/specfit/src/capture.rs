use rayon::prelude::*;
use specfit_image::{Image, ImageSize};

use crate::error::FitError;
use crate::geometry::SurfaceGeometry;
use crate::view_set::ViewSet;

/// What one view saw of every texel, resampled into texture space.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewObservation {
    /// Linear RGB radiance.
    pub radiance: Image<f32, 3>,
    /// Validity weight; `0` marks occluded, out-of-frame or rejected texels.
    pub weight: Image<f32, 1>,
}

impl ViewObservation {
    /// An observation in which no texel is valid.
    pub fn empty(size: ImageSize) -> Result<Self, FitError> {
        Ok(Self {
            radiance: Image::from_size_val(size, 0.0)?,
            weight: Image::from_size_val(size, 0.0)?,
        })
    }

    /// Texture size of the observation.
    pub fn size(&self) -> ImageSize {
        self.weight.size()
    }

    /// Radiance and weight of a texel, or `None` when the weight is not positive.
    pub fn sample(&self, texel: usize) -> Option<([f64; 3], f64)> {
        let w = *self.weight.as_slice().get(texel)? as f64;
        if !(w > 0.0) {
            return None;
        }
        let r = self.radiance.texel(texel)?;
        Some(([r[0] as f64, r[1] as f64, r[2] as f64], w))
    }
}

/// A producer of texture-space observations for a view.
///
/// This is the seam at which photographs, depth tests and any
/// hardware-specific resampling are injected into the fit.
pub trait SampleSource {
    /// Produce the observation of `view`.
    fn observe(
        &self,
        view_set: &ViewSet,
        geometry: &SurfaceGeometry,
        view: usize,
    ) -> Result<ViewObservation, FitError>;
}

/// Samples linear photographs by projecting every texel into the view.
#[derive(Debug, Clone)]
pub struct PhotographSampler {
    /// One linear RGB photograph per view.
    pub photographs: Vec<Image<f32, 3>>,
    /// Optional per-view depth images used to reject occluded texels.
    pub depth_maps: Option<Vec<Image<f32, 1>>>,
    /// Relative tolerance of the depth test.
    pub depth_bias: f64,
    /// Pixels with any channel at or above this value are rejected.
    pub saturation_threshold: Option<f32>,
}

impl PhotographSampler {
    /// A sampler without depth test or saturation rejection.
    pub fn new(photographs: Vec<Image<f32, 3>>) -> Self {
        Self {
            photographs,
            depth_maps: None,
            depth_bias: 0.01,
            saturation_threshold: None,
        }
    }
}

// bilinear interpolation with pixel centers at half-integer coordinates
fn sample_bilinear(image: &Image<f32, 3>, x: f64, y: f64) -> [f64; 3] {
    let (w, h) = (image.width(), image.height());
    let fx = (x - 0.5).clamp(0.0, (w - 1) as f64);
    let fy = (y - 0.5).clamp(0.0, (h - 1) as f64);
    let (x0, y0) = (fx.floor() as usize, fy.floor() as usize);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (ax, ay) = (fx - x0 as f64, fy - y0 as f64);

    let data = image.as_slice();
    let px = |x: usize, y: usize, c: usize| data[(y * w + x) * 3 + c] as f64;
    let mut out = [0.0; 3];
    for (c, o) in out.iter_mut().enumerate() {
        let top = px(x0, y0, c) * (1.0 - ax) + px(x1, y0, c) * ax;
        let bottom = px(x0, y1, c) * (1.0 - ax) + px(x1, y1, c) * ax;
        *o = top * (1.0 - ay) + bottom * ay;
    }
    out
}

impl SampleSource for PhotographSampler {
    fn observe(
        &self,
        view_set: &ViewSet,
        geometry: &SurfaceGeometry,
        view: usize,
    ) -> Result<ViewObservation, FitError> {
        let count_mismatch = |actual| FitError::CountMismatch {
            stage: "sampling",
            what: "photographs",
            expected: view_set.len(),
            actual,
        };
        let photo = self
            .photographs
            .get(view)
            .ok_or_else(|| count_mismatch(self.photographs.len()))?;
        let camera = view_set.view(view).ok_or_else(|| count_mismatch(view))?;
        FitError::check_size(
            "sampling",
            format!("photograph {view}"),
            camera.image_size,
            photo.size(),
        )?;

        let depth = match &self.depth_maps {
            Some(maps) => {
                let map = maps.get(view).ok_or(FitError::CountMismatch {
                    stage: "sampling",
                    what: "depth maps",
                    expected: view_set.len(),
                    actual: maps.len(),
                })?;
                FitError::check_size(
                    "sampling",
                    format!("depth map {view}"),
                    camera.image_size,
                    map.size(),
                )?;
                Some(map)
            }
            None => None,
        };

        let eye = camera.camera_position();
        let size = geometry.size();
        let samples: Vec<([f32; 3], f32)> = (0..geometry.num_texels())
            .into_par_iter()
            .map(|t| {
                if !geometry.is_covered(t) {
                    return ([0.0; 3], 0.0);
                }
                let x = geometry.position(t);
                if geometry.frame(t).n.dot(eye - x) <= 0.0 {
                    return ([0.0; 3], 0.0);
                }
                let Some(p) = camera.project(x) else {
                    return ([0.0; 3], 0.0);
                };
                if let Some(map) = depth {
                    let px = (p.x as usize).min(map.width() - 1);
                    let py = (p.y as usize).min(map.height() - 1);
                    let d = map.as_slice()[py * map.width() + px] as f64;
                    if p.depth > d * (1.0 + self.depth_bias) {
                        return ([0.0; 3], 0.0);
                    }
                }
                let rgb = sample_bilinear(photo, p.x, p.y);
                if let Some(limit) = self.saturation_threshold {
                    if rgb.iter().any(|&v| v as f32 >= limit) {
                        return ([0.0; 3], 0.0);
                    }
                }
                ([rgb[0] as f32, rgb[1] as f32, rgb[2] as f32], 1.0)
            })
            .collect();

        let radiance = samples.iter().flat_map(|(rgb, _)| *rgb).collect();
        let weight = samples.iter().map(|(_, w)| *w).collect();
        Ok(ViewObservation {
            radiance: Image::new(size, radiance)?,
            weight: Image::new(size, weight)?,
        })
    }
}

/// Everything the fit consumes: calibration, geometry and observations.
#[derive(Debug, Clone)]
pub struct Capture {
    /// Calibrated views.
    pub view_set: ViewSet,
    /// Texture-space surface.
    pub geometry: SurfaceGeometry,
    /// One observation per view.
    pub observations: Vec<ViewObservation>,
    /// Tangent-space normals to start from; `+z` everywhere when absent.
    pub baseline_normals: Option<Image<f32, 3>>,
    /// Encoded reference normal map (`0.5 + 0.5 n`, alpha marks valid texels).
    pub reference_normals: Option<Image<f32, 4>>,
}

impl Capture {
    /// Assemble a capture and check that every raster agrees.
    pub fn new(
        view_set: ViewSet,
        geometry: SurfaceGeometry,
        observations: Vec<ViewObservation>,
    ) -> Result<Self, FitError> {
        let capture = Self {
            view_set,
            geometry,
            observations,
            baseline_normals: None,
            reference_normals: None,
        };
        capture.validate()?;
        Ok(capture)
    }

    /// Sample every view from `source`.
    pub fn from_source(
        view_set: ViewSet,
        geometry: SurfaceGeometry,
        source: &impl SampleSource,
    ) -> Result<Self, FitError> {
        let observations = (0..view_set.len())
            .map(|v| source.observe(&view_set, &geometry, v))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(view_set, geometry, observations)
    }

    /// Attach baseline tangent-space normals.
    pub fn with_baseline_normals(mut self, normals: Image<f32, 3>) -> Result<Self, FitError> {
        FitError::check_size("capture", "baseline normals", self.texture_size(), normals.size())?;
        self.baseline_normals = Some(normals);
        Ok(self)
    }

    /// Attach a reference normal map for the normal error diagnostic.
    pub fn with_reference_normals(mut self, normals: Image<f32, 4>) -> Result<Self, FitError> {
        FitError::check_size("capture", "reference normals", self.texture_size(), normals.size())?;
        self.reference_normals = Some(normals);
        Ok(self)
    }

    /// Check view and observation counts and raster sizes.
    pub fn validate(&self) -> Result<(), FitError> {
        if self.observations.len() != self.view_set.len() {
            return Err(FitError::CountMismatch {
                stage: "capture",
                what: "observations",
                expected: self.view_set.len(),
                actual: self.observations.len(),
            });
        }
        let size = self.texture_size();
        for (v, obs) in self.observations.iter().enumerate() {
            let radiance = format!("radiance of view {v}");
            FitError::check_size("capture", radiance, size, obs.radiance.size())?;
            let weight = format!("weight of view {v}");
            FitError::check_size("capture", weight, size, obs.weight.size())?;
        }
        if let Some(normals) = &self.baseline_normals {
            FitError::check_size("capture", "baseline normals", size, normals.size())?;
        }
        if let Some(normals) = &self.reference_normals {
            FitError::check_size("capture", "reference normals", size, normals.size())?;
        }
        Ok(())
    }

    /// Texture raster size shared by every map.
    pub fn texture_size(&self) -> ImageSize {
        self.geometry.size()
    }

    /// Number of texels in the raster.
    pub fn num_texels(&self) -> usize {
        self.geometry.num_texels()
    }

    /// Whether any covered texel has a positive weight in any view.
    pub fn has_any_observation(&self) -> bool {
        self.observations.iter().any(|obs| {
            obs.weight
                .as_slice()
                .iter()
                .enumerate()
                .any(|(t, &w)| w > 0.0 && self.geometry.is_covered(t))
        })
    }
}
