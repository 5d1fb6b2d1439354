use glam::DVec3;

use crate::view_set::ViewSet;

/// Camera and light of one view, resolved to world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadingContext {
    /// Camera center.
    pub eye: DVec3,
    /// Light position.
    pub light: DVec3,
    /// Light RGB intensity.
    pub intensity: DVec3,
}

impl ShadingContext {
    /// Resolve every view of `view_set`.
    pub fn for_views(view_set: &ViewSet) -> Vec<Self> {
        (0..view_set.len())
            .map(|v| Self {
                eye: view_set.views()[v].camera_position(),
                light: view_set.light_world_position(v).unwrap_or(DVec3::ZERO),
                intensity: view_set.light_intensity(v).unwrap_or(DVec3::ZERO),
            })
            .collect()
    }

    /// Shading geometry at world position `x` with unit normal `n`.
    ///
    /// Returns `None` when the light or the camera is below the surface.
    pub fn sample(&self, x: DVec3, n: DVec3) -> Option<SampleGeometry> {
        let to_light = self.light - x;
        let l = to_light.normalize_or_zero();
        let v = (self.eye - x).normalize_or_zero();
        let n_dot_l = n.dot(l);
        let n_dot_v = n.dot(v);
        if !(n_dot_l > 0.0 && n_dot_v > 0.0) {
            return None;
        }
        let h = (l + v).normalize_or_zero();
        Some(SampleGeometry {
            n_dot_l,
            n_dot_v,
            n_dot_h: n.dot(h).clamp(0.0, 1.0),
            v_dot_h: v.dot(h).max(f64::EPSILON),
            irradiance: self.intensity / to_light.length_squared().max(f64::EPSILON),
        })
    }
}

/// Cosines and irradiance of a single (view, texel) sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleGeometry {
    /// Cosine between normal and light direction, positive.
    pub n_dot_l: f64,
    /// Cosine between normal and view direction, positive.
    pub n_dot_v: f64,
    /// Cosine between normal and halfway vector, in `[0, 1]`.
    pub n_dot_h: f64,
    /// Cosine between view direction and halfway vector.
    pub v_dot_h: f64,
    /// RGB irradiance arriving at the texel, `I / d²`.
    pub irradiance: DVec3,
}

impl SampleGeometry {
    /// Continuous index into a table with `resolution` steps.
    pub fn halfway_index(&self, resolution: usize) -> f64 {
        halfway_index(self.n_dot_h, resolution)
    }

    /// V-cavity masking-shadowing, or `1` when disabled.
    pub fn masking_shadowing(&self, enabled: bool) -> f64 {
        if !enabled {
            return 1.0;
        }
        let k = 2.0 * self.n_dot_h / self.v_dot_h;
        (k * self.n_dot_v).min(k * self.n_dot_l).min(1.0)
    }

    /// Microfacet geometry factor `G / (4 n·l n·v)`.
    pub fn geometry_factor(&self, masking: bool) -> f64 {
        self.masking_shadowing(masking) / (4.0 * self.n_dot_l * self.n_dot_v)
    }

    /// Irradiance projected on the surface, `E n·l`.
    pub fn incident(&self) -> DVec3 {
        self.irradiance * self.n_dot_l
    }
}

/// Map a halfway cosine to a continuous table index.
pub fn halfway_index(n_dot_h: f64, resolution: usize) -> f64 {
    (1.0 - n_dot_h.clamp(0.0, 1.0)).sqrt() * resolution as f64
}

/// Inverse of [`halfway_index`]: the halfway angle of table bin `i`.
pub fn bin_angle(i: f64, resolution: usize) -> f64 {
    let s = (i / resolution as f64).clamp(0.0, 1.0);
    (1.0 - s * s).acos()
}

/// Cubic smoothstep `3x² − 2x³` on `[0, 1]`.
pub fn smoothstep(x: f64) -> f64 {
    let x = x.clamp(0.0, 1.0);
    x * x * (3.0 - 2.0 * x)
}

/// GGX (Trowbridge-Reitz) normal distribution.
pub fn ggx_distribution(n_dot_h: f64, alpha: f64) -> f64 {
    let a2 = alpha * alpha;
    let c2 = n_dot_h * n_dot_h;
    let denom = c2 * (a2 - 1.0) + 1.0;
    a2 / (std::f64::consts::PI * denom * denom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn head_on_sample() {
        let ctx = ShadingContext {
            eye: DVec3::new(0.0, 0.0, 2.0),
            light: DVec3::new(0.0, 0.0, 2.0),
            intensity: DVec3::splat(4.0),
        };
        let s = ctx.sample(DVec3::ZERO, DVec3::Z).unwrap();
        assert_relative_eq!(s.n_dot_l, 1.0);
        assert_relative_eq!(s.n_dot_h, 1.0);
        assert_relative_eq!(s.irradiance, DVec3::ONE);
        assert_relative_eq!(s.halfway_index(90), 0.0);
        assert_relative_eq!(s.masking_shadowing(true), 1.0);
        assert_relative_eq!(s.geometry_factor(true), 0.25);

        assert!(ctx.sample(DVec3::ZERO, -DVec3::Z).is_none());
    }

    #[test]
    fn grazing_masking() {
        let s = SampleGeometry {
            n_dot_l: 0.1,
            n_dot_v: 0.1,
            n_dot_h: 0.1,
            v_dot_h: 1.0,
            irradiance: DVec3::ONE,
        };
        assert_relative_eq!(s.masking_shadowing(true), 0.02);
        assert_relative_eq!(s.masking_shadowing(false), 1.0);
    }

    #[test]
    fn index_angle_inverse() {
        for i in [0.0, 10.0, 45.0, 89.0] {
            let theta = bin_angle(i, 90);
            assert_relative_eq!(halfway_index(theta.cos(), 90), i, epsilon = 1e-9);
        }
        assert_relative_eq!(halfway_index(0.0, 90), 90.0);
    }

    #[test]
    fn lobe_shapes() {
        assert_eq!(smoothstep(-1.0), 0.0);
        assert_eq!(smoothstep(2.0), 1.0);
        assert_relative_eq!(smoothstep(0.5), 0.5);
        // GGX with alpha 1 is the uniform 1/π
        assert_relative_eq!(ggx_distribution(0.3, 1.0), std::f64::consts::FRAC_1_PI);
        assert_relative_eq!(ggx_distribution(1.0, 0.5), 1.0 / (std::f64::consts::PI * 0.25));
    }
}
