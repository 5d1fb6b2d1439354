use glam::DVec3;
use rayon::prelude::*;
use specfit_image::Image;

use crate::capture::Capture;
use crate::error::FitError;
use crate::shading::ShadingContext;

/// One usable (view, texel) observation with its shading terms resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitSample {
    /// Index of the view.
    pub view: usize,
    /// RGB irradiance `E`.
    pub irradiance: [f64; 3],
    /// Cosine between normal and light.
    pub n_dot_l: f64,
    /// Microfacet geometry factor `G / (4 n·l n·v)`.
    pub geom: f64,
    /// Continuous halfway index into the basis tables.
    pub m: f64,
    /// Observed linear radiance.
    pub radiance: [f64; 3],
    /// Validity weight, strictly positive.
    pub weight: f64,
}

impl FitSample {
    /// Projected irradiance `E n·l` of channel `c`.
    pub fn incident(&self, c: usize) -> f64 {
        self.irradiance[c] * self.n_dot_l
    }
}

/// World normal of texel `t` for a tangent-space normal map.
pub fn world_normal(capture: &Capture, normals: &Image<f32, 3>, t: usize) -> DVec3 {
    let n = normals
        .texel(t)
        .map_or(DVec3::Z, |n| DVec3::new(n[0] as f64, n[1] as f64, n[2] as f64));
    capture.geometry.frame(t).to_world(n).normalize_or_zero()
}

/// All usable samples of every texel, grouped per texel.
///
/// Depends on the normal map, so it is rebuilt whenever normals change.
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    texels: Vec<Vec<FitSample>>,
}

impl SampleTable {
    /// Resolve the shading terms of every usable sample.
    ///
    /// # Arguments
    ///
    /// * `capture` - The capture providing observations and geometry.
    /// * `normals` - Tangent-space normals, one per texel.
    /// * `resolution` - Number of angular steps of the basis tables.
    /// * `masking` - Whether to apply V-cavity masking-shadowing.
    pub fn build(
        capture: &Capture,
        normals: &Image<f32, 3>,
        resolution: usize,
        masking: bool,
    ) -> Result<Self, FitError> {
        FitError::check_size("sampling", "normal map", capture.texture_size(), normals.size())?;
        let contexts = ShadingContext::for_views(&capture.view_set);

        let texels = (0..capture.num_texels())
            .into_par_iter()
            .map(|t| {
                if !capture.geometry.is_covered(t) {
                    return Vec::new();
                }
                let x = capture.geometry.position(t);
                let n = world_normal(capture, normals, t);
                capture
                    .observations
                    .iter()
                    .zip(&contexts)
                    .enumerate()
                    .filter_map(|(view, (obs, ctx))| {
                        let (radiance, weight) = obs.sample(t)?;
                        let s = ctx.sample(x, n)?;
                        Some(FitSample {
                            view,
                            irradiance: s.irradiance.to_array(),
                            n_dot_l: s.n_dot_l,
                            geom: s.geometry_factor(masking),
                            m: s.halfway_index(resolution),
                            radiance,
                            weight,
                        })
                    })
                    .collect()
            })
            .collect();

        Ok(Self { texels })
    }

    /// Wrap samples that were resolved elsewhere, one list per texel.
    pub fn from_texels(texels: Vec<Vec<FitSample>>) -> Self {
        Self { texels }
    }

    /// Number of texels, observed or not.
    pub fn num_texels(&self) -> usize {
        self.texels.len()
    }

    /// Samples of texel `t`.
    pub fn texel(&self, t: usize) -> &[FitSample] {
        &self.texels[t]
    }

    /// Whether texel `t` has at least one usable sample.
    pub fn is_observed(&self, t: usize) -> bool {
        !self.texels[t].is_empty()
    }

    /// Number of texels with at least one usable sample.
    pub fn observed_count(&self) -> usize {
        self.texels.iter().filter(|s| !s.is_empty()).count()
    }

    /// Per-texel sample lists, for parallel iteration.
    pub fn as_slice(&self) -> &[Vec<FitSample>] {
        &self.texels
    }
}
