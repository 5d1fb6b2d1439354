use rayon::prelude::*;
use specfit_image::Image;

use crate::error::FitError;
use crate::material::MaterialEstimate;
use crate::roughness::luminance;

/// Reflectivity of a dielectric at normal incidence.
pub const DIELECTRIC_F0: f64 = 0.04;

/// Linear base colour with packed occlusion, roughness and metallic maps.
#[derive(Debug, Clone, PartialEq)]
pub struct AlbedoOrm {
    /// Linear base colour.
    pub albedo: Image<f32, 3>,
    /// Occlusion, perceptual roughness `sqrt(α)` and metallic, one per channel.
    pub orm: Image<f32, 3>,
}

/// Metallic factor reproducing a diffuse and specular brightness pair.
///
/// Solves `specular = F0 (1 − m) + base m` together with
/// `diffuse = base (1 − F0) (1 − m)` for `m`, where `F0` is
/// [`DIELECTRIC_F0`]. A specular brightness at or below that of a
/// dielectric is never metallic.
pub fn solve_metallic(diffuse: f64, specular: f64, one_minus_specular_strength: f64) -> f64 {
    if specular < DIELECTRIC_F0 {
        return 0.0;
    }
    let a = DIELECTRIC_F0;
    let b = diffuse * one_minus_specular_strength / (1.0 - DIELECTRIC_F0) + specular
        - 2.0 * DIELECTRIC_F0;
    let c = DIELECTRIC_F0 - specular;
    let d = (b * b - 4.0 * a * c).max(0.0);
    ((-b + d.sqrt()) / (2.0 * a)).clamp(0.0, 1.0)
}

fn texel_albedo_orm(diffuse: &[f32], specular: &[f32], alpha: f32) -> ([f32; 3], [f32; 3]) {
    let d = [diffuse[0] as f64, diffuse[1] as f64, diffuse[2] as f64];
    let s = [specular[0] as f64, specular[1] as f64, specular[2] as f64];
    let one_minus_strength = 1.0 - s.iter().copied().fold(0.0, f64::max).min(1.0);
    let metallic = solve_metallic(luminance(&d), luminance(&s), one_minus_strength);

    let blend = metallic * metallic;
    let albedo = std::array::from_fn(|c| {
        let from_diffuse =
            d[c] * one_minus_strength / (1.0 - DIELECTRIC_F0) / (1.0 - metallic).max(1e-6);
        let from_specular = (s[c] - DIELECTRIC_F0 * (1.0 - metallic)) / metallic.max(1e-6);
        (from_diffuse + (from_specular - from_diffuse) * blend).clamp(0.0, 1.0) as f32
    });
    let roughness = alpha.max(0.0).sqrt().min(1.0);
    (albedo, [1.0, roughness, metallic as f32])
}

/// Convert the diffuse and GGX maps of a fit to metallic-roughness maps.
///
/// Occlusion is not estimated and is written as one.
///
/// # Arguments
///
/// * `material` - The fitted material maps.
///
/// # Returns
///
/// The base colour and packed ORM maps, sharing the material's raster.
pub fn estimate_albedo_orm(material: &MaterialEstimate) -> Result<AlbedoOrm, FitError> {
    let size = material.size();
    material.check_size("albedo orm", size)?;

    let (albedo, orm): (Vec<[f32; 3]>, Vec<[f32; 3]>) = material
        .diffuse
        .as_slice()
        .par_chunks_exact(3)
        .zip(material.specular.as_slice().par_chunks_exact(3))
        .zip(material.roughness.as_slice().par_iter())
        .map(|((d, s), &alpha)| texel_albedo_orm(d, s, alpha))
        .unzip();

    Ok(AlbedoOrm {
        albedo: Image::new(size, albedo.into_iter().flatten().collect())?,
        orm: Image::new(size, orm.into_iter().flatten().collect())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn dielectric_keeps_its_diffuse() {
        let (albedo, orm) = texel_albedo_orm(&[0.5, 0.25, 0.1], &[0.04; 3], 0.09);
        assert_eq!(orm[2], 0.0);
        assert_relative_eq!(orm[1], 0.3, epsilon = 1e-6);
        assert_eq!(orm[0], 1.0);
        assert_relative_eq!(albedo[0], 0.5, epsilon = 1e-6);
        assert_relative_eq!(albedo[1], 0.25, epsilon = 1e-6);
    }

    #[test]
    fn bright_specular_without_diffuse_is_metal() {
        assert_relative_eq!(solve_metallic(0.0, 0.9, 0.1), 1.0, epsilon = 1e-9);
        let (albedo, orm) = texel_albedo_orm(&[0.0; 3], &[0.9, 0.8, 0.7], 0.25);
        assert_relative_eq!(orm[2], 1.0, epsilon = 1e-3);
        assert_relative_eq!(albedo[0], 0.9, epsilon = 1e-3);
        assert_relative_eq!(albedo[2], 0.7, epsilon = 1e-3);
    }

    #[test]
    fn maps_share_the_material_raster() -> Result<(), FitError> {
        let mut material = MaterialEstimate::flat([3, 2].into())?;
        material.diffuse = Image::from_size_val(material.size(), 0.3)?;
        material.specular = Image::from_size_val(material.size(), 0.02)?;
        let maps = estimate_albedo_orm(&material)?;
        assert_eq!(maps.albedo.size(), material.size());
        assert!(maps.orm.as_slice().chunks_exact(3).all(|p| p == [1.0, 1.0, 0.0]));
        Ok(())
    }
}
