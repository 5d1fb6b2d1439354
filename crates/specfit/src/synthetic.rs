use std::f64::consts::FRAC_1_PI;

use glam::{DMat4, DVec3};
use rand::{rngs::StdRng, Rng, SeedableRng};
use specfit_image::{Image, ImageSize};

use crate::capture::{Capture, ViewObservation};
use crate::error::FitError;
use crate::geometry::SurfaceGeometry;
use crate::shading::{ggx_distribution, ShadingContext};
use crate::view_set::{Light, Projection, View, ViewSet};

/// A planar patch under a ring of cameras with co-located flashes.
///
/// Observations are evaluated analytically from a diffuse albedo and a GGX
/// lobe, so fits can be compared against known parameters.
///
/// # Example
///
/// ```
/// use specfit::synthetic::SyntheticScene;
///
/// let scene = SyntheticScene {
///     texture_size: [2, 2].into(),
///     ..Default::default()
/// };
/// let capture = scene.build().unwrap();
/// assert_eq!(capture.view_set.len(), scene.view_count());
/// assert!(capture.has_any_observation());
/// ```
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    /// Texture raster size.
    pub texture_size: ImageSize,
    /// Side length of the patch.
    pub extent: f64,
    /// Photograph size of every view.
    pub image_size: ImageSize,
    /// Camera distance from the patch center.
    pub distance: f64,
    /// Camera elevations above the patch, in degrees.
    pub elevations: Vec<f64>,
    /// Cameras per elevation, evenly spaced in azimuth.
    pub azimuth_count: usize,
    /// Uniform linear diffuse albedo.
    pub albedo: [f64; 3],
    /// Per-texel albedo overriding [`SyntheticScene::albedo`].
    pub albedo_map: Option<Image<f32, 3>>,
    /// GGX reflectivity at normal incidence.
    pub f0: [f64; 3],
    /// GGX roughness.
    pub roughness: f64,
    /// Flash intensity; scaled by `distance²` so irradiance is near this value.
    pub light_intensity: f64,
    /// Views whose observations carry zero weight.
    pub occluded_views: Vec<usize>,
    /// Relative uniform noise amplitude.
    pub noise: f64,
    /// Seed of the noise generator.
    pub seed: u64,
    /// Whether the lobe uses V-cavity masking-shadowing.
    pub masking_shadowing: bool,
}

impl Default for SyntheticScene {
    fn default() -> Self {
        Self {
            texture_size: [8, 8].into(),
            extent: 1.0,
            image_size: [64, 64].into(),
            distance: 3.0,
            elevations: vec![30.0, 55.0, 80.0],
            azimuth_count: 4,
            albedo: [0.5; 3],
            albedo_map: None,
            f0: [0.04; 3],
            roughness: 0.3,
            light_intensity: 1.0,
            occluded_views: Vec::new(),
            noise: 0.0,
            seed: 0,
            masking_shadowing: true,
        }
    }
}

impl SyntheticScene {
    /// Number of views generated.
    pub fn view_count(&self) -> usize {
        self.elevations.len() * self.azimuth_count
    }

    /// Camera centers, elevation major.
    pub fn camera_positions(&self) -> Vec<DVec3> {
        self.elevations
            .iter()
            .flat_map(|&elevation| {
                let e = elevation.to_radians();
                (0..self.azimuth_count).map(move |i| {
                    let a = std::f64::consts::TAU * i as f64 / self.azimuth_count as f64;
                    self.distance * DVec3::new(e.cos() * a.cos(), e.cos() * a.sin(), e.sin())
                })
            })
            .collect()
    }

    /// Calibrated views looking at the patch center, one flash each.
    pub fn view_set(&self) -> Result<ViewSet, FitError> {
        let fov = 2.0 * (self.extent / self.distance).atan();
        let projection = Projection::new(fov, 0.1 * self.distance, 10.0 * self.distance);
        let intensity = DVec3::splat(self.light_intensity * self.distance * self.distance);

        let mut views = Vec::new();
        let mut lights = Vec::new();
        for (i, eye) in self.camera_positions().into_iter().enumerate() {
            let up = if eye.normalize().z.abs() > 0.99 {
                DVec3::Y
            } else {
                DVec3::Z
            };
            views.push(View {
                world_to_camera: DMat4::look_at_rh(eye, DVec3::ZERO, up),
                projection,
                image_size: self.image_size,
                light_index: i,
            });
            lights.push(Light::flash(intensity));
        }
        ViewSet::new(views, lights, 0)
    }

    /// Ground truth albedo of texel `t`.
    pub fn albedo_at(&self, t: usize) -> [f64; 3] {
        self.albedo_map
            .as_ref()
            .and_then(|map| map.texel(t))
            .map_or(self.albedo, |v| [v[0] as f64, v[1] as f64, v[2] as f64])
    }

    /// Reference normal map: `+z` everywhere, encoded, every texel valid.
    pub fn reference_normals(&self) -> Image<f32, 4> {
        Image::from_fn(self.texture_size, |_, _| [0.5, 0.5, 1.0, 1.0])
    }

    /// Generate the capture.
    pub fn build(&self) -> Result<Capture, FitError> {
        if let Some(map) = &self.albedo_map {
            FitError::check_size("synthetic scene", "albedo map", self.texture_size, map.size())?;
        }
        let view_set = self.view_set()?;
        let geometry = SurfaceGeometry::planar(self.texture_size, self.extent);
        let contexts = ShadingContext::for_views(&view_set);
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut observations = Vec::with_capacity(view_set.len());
        for (v, (view, ctx)) in view_set.views().iter().zip(&contexts).enumerate() {
            let mut obs = ViewObservation::empty(self.texture_size)?;
            let occluded = self.occluded_views.contains(&v);
            for t in 0..geometry.num_texels() {
                let x = geometry.position(t);
                let Some(sample) = ctx.sample(x, geometry.frame(t).n) else {
                    continue;
                };
                if view.project(x).is_none() {
                    continue;
                }
                let geom = sample.geometry_factor(self.masking_shadowing);
                let d = ggx_distribution(sample.n_dot_h, self.roughness);
                let albedo = self.albedo_at(t);
                let incident = sample.incident();
                for c in 0..3 {
                    let clean = incident[c] * (albedo[c] * FRAC_1_PI + geom * self.f0[c] * d);
                    let noisy = if self.noise > 0.0 {
                        clean * (1.0 + rng.random_range(-self.noise..self.noise))
                    } else {
                        clean
                    };
                    obs.radiance.as_slice_mut()[3 * t + c] = noisy.max(0.0) as f32;
                }
                obs.weight.as_slice_mut()[t] = if occluded { 0.0 } else { 1.0 };
            }
            observations.push(obs);
        }

        Capture::new(view_set, geometry, observations)?
            .with_reference_normals(self.reference_normals())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn lambertian_radiance_is_albedo_over_pi() -> Result<(), FitError> {
        let scene = SyntheticScene {
            texture_size: [1, 1].into(),
            extent: 0.01,
            elevations: vec![90.0],
            azimuth_count: 1,
            f0: [0.0; 3],
            ..Default::default()
        };
        let capture = scene.build()?;
        let (radiance, weight) = capture.observations[0]
            .sample(0)
            .ok_or(FitError::InsufficientData { stage: "test" })?;
        assert_eq!(weight, 1.0);
        // head-on flash at the scaled intensity gives unit irradiance
        assert_relative_eq!(radiance[0], 0.5 * FRAC_1_PI, max_relative = 1e-5);
        Ok(())
    }

    #[test]
    fn occluded_views_carry_no_weight() -> Result<(), FitError> {
        let scene = SyntheticScene {
            texture_size: [2, 2].into(),
            occluded_views: vec![1],
            ..Default::default()
        };
        let capture = scene.build()?;
        assert!(capture.observations[1].weight.as_slice().iter().all(|&w| w == 0.0));
        assert!(capture.observations[0].weight.as_slice().iter().all(|&w| w == 1.0));
        Ok(())
    }

    #[test]
    fn noise_is_seeded() -> Result<(), FitError> {
        let scene = SyntheticScene {
            texture_size: [2, 2].into(),
            noise: 0.05,
            seed: 7,
            ..Default::default()
        };
        let a = scene.build()?;
        let b = scene.build()?;
        assert_eq!(a.observations[2].radiance, b.observations[2].radiance);
        Ok(())
    }
}
