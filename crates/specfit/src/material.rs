use glam::DVec3;
use specfit_image::{Image, ImageSize};

use crate::basis::BasisSet;
use crate::error::FitError;
use crate::weights::WeightMap;

/// Per-texel material maps sharing the texture raster.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialEstimate {
    /// Linear diffuse albedo.
    pub diffuse: Image<f32, 3>,
    /// Unit tangent-space normals.
    pub normal: Image<f32, 3>,
    /// GGX reflectivity at normal incidence, linear RGB.
    pub specular: Image<f32, 3>,
    /// GGX roughness `α`.
    pub roughness: Image<f32, 1>,
    /// Constant (translucency) term, when estimated.
    pub constant: Option<Image<f32, 3>>,
}

impl MaterialEstimate {
    /// Black maps with flat `+z` normals.
    pub fn flat(size: ImageSize) -> Result<Self, FitError> {
        Ok(Self {
            diffuse: Image::from_size_val(size, 0.0)?,
            normal: Image::from_fn(size, |_, _| [0.0, 0.0, 1.0]),
            specular: Image::from_size_val(size, 0.0)?,
            roughness: Image::from_size_val(size, 1.0)?,
            constant: None,
        })
    }

    /// Texture raster size.
    pub fn size(&self) -> ImageSize {
        self.diffuse.size()
    }

    /// Check that every map shares `size`.
    pub fn check_size(&self, stage: &'static str, size: ImageSize) -> Result<(), FitError> {
        FitError::check_size(stage, "diffuse map", size, self.diffuse.size())?;
        FitError::check_size(stage, "normal map", size, self.normal.size())?;
        FitError::check_size(stage, "specular map", size, self.specular.size())?;
        FitError::check_size(stage, "roughness map", size, self.roughness.size())?;
        if let Some(constant) = &self.constant {
            FitError::check_size(stage, "constant map", size, constant.size())?;
        }
        Ok(())
    }

    /// Tangent-space normal of texel `t`.
    pub fn tangent_normal(&self, t: usize) -> DVec3 {
        self.normal
            .texel(t)
            .map(|n| DVec3::new(n[0] as f64, n[1] as f64, n[2] as f64))
            .unwrap_or(DVec3::Z)
    }

    /// Final diffuse albedo of texel `t`.
    pub fn diffuse_at(&self, t: usize) -> [f64; 3] {
        rgb(&self.diffuse, t)
    }

    /// Reflectivity of texel `t`.
    pub fn specular_at(&self, t: usize) -> [f64; 3] {
        rgb(&self.specular, t)
    }

    /// Roughness of texel `t`.
    pub fn roughness_at(&self, t: usize) -> f64 {
        self.roughness.as_slice().get(t).copied().unwrap_or(1.0) as f64
    }

    /// Constant term of texel `t`, zero when not estimated.
    pub fn constant_at(&self, t: usize) -> [f64; 3] {
        self.constant.as_ref().map_or([0.0; 3], |c| rgb(c, t))
    }
}

fn rgb(image: &Image<f32, 3>, t: usize) -> [f64; 3] {
    image
        .texel(t)
        .map_or([0.0; 3], |v| [v[0] as f64, v[1] as f64, v[2] as f64])
}

/// A complete fit: the global basis, its weights and the material maps.
#[derive(Debug, Clone, PartialEq)]
pub struct FitSolution {
    /// Global basis functions.
    pub basis: BasisSet,
    /// Per-texel basis weights.
    pub weights: WeightMap,
    /// Material maps.
    pub material: MaterialEstimate,
}

impl FitSolution {
    /// Texture raster size.
    pub fn size(&self) -> ImageSize {
        self.weights.size()
    }

    /// Check that the weights and every material map share the raster of `stage`.
    pub fn check(&self, stage: &'static str, size: ImageSize) -> Result<(), FitError> {
        FitError::check_size(stage, "weight map", size, self.weights.size())?;
        self.material.check_size(stage, size)?;
        if self.weights.count() != self.basis.count() {
            return Err(FitError::CountMismatch {
                stage,
                what: "weights per texel",
                expected: self.basis.count(),
                actual: self.weights.count(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_material_and_checks() -> Result<(), FitError> {
        let size: ImageSize = [2, 3].into();
        let material = MaterialEstimate::flat(size)?;
        assert_eq!(material.tangent_normal(4), DVec3::Z);
        assert_eq!(material.constant_at(0), [0.0; 3]);
        assert_eq!(material.roughness_at(5), 1.0);

        let solution = FitSolution {
            basis: BasisSet::zeros(2, 4),
            weights: WeightMap::uniform(size, 3),
            material,
        };
        assert!(matches!(
            solution.check("test", size),
            Err(FitError::CountMismatch { .. })
        ));
        assert!(matches!(
            solution.check("test", [3, 2].into()),
            Err(FitError::DimensionMismatch { .. })
        ));
        Ok(())
    }
}
