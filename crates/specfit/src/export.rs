use std::path::{Path, PathBuf};

use glam::DVec3;
use serde::{Deserialize, Serialize};
use specfit_image::{
    color::{linear_image_from_srgb, srgb_image_from_linear},
    Image, ImageSize,
};
use specfit_io::functional::{
    read_image_f32_gray, read_image_f32_rgb, read_image_f32_rgba, write_image_f32_gray,
    write_image_f32_rgb, write_image_f32_rgba,
};

use crate::albedo_orm::estimate_albedo_orm;
use crate::basis::BasisSet;
use crate::diagnostics::FitDiagnostics;
use crate::error::FitError;
use crate::gltf::{GltfDocument, GLTF_FILE};
use crate::material::{FitSolution, MaterialEstimate};
use crate::settings::FitSettings;
use crate::weights::WeightMap;

const STAGE: &str = "export";

/// Weights packed into one RGBA weight image.
pub const WEIGHTS_PER_IMAGE: usize = 4;

/// File name of the material manifest.
pub const MANIFEST_FILE: &str = "material.json";

/// File name of the serialized basis.
pub const BASIS_FILE: &str = "basis.json";

/// File name of the comma separated basis table.
pub const BASIS_TABLE_FILE: &str = "basisFunctions.csv";

/// Describes every artifact of a fit so that scene exporters and
/// [`load_fit`] can find them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialManifest {
    /// Texture width.
    pub width: usize,
    /// Texture height.
    pub height: usize,
    /// Number of basis functions.
    pub basis_count: usize,
    /// Angular steps of the basis tables.
    pub basis_resolution: usize,
    /// Metallicity the basis was fitted with.
    pub metallicity: f64,
    /// Whether masking-shadowing was applied during the fit.
    pub masking_shadowing: bool,
    /// Weight images in basis order.
    pub weight_images: Vec<String>,
    /// Whether each weight image packs [`WEIGHTS_PER_IMAGE`] weights.
    pub combined_weights: bool,
    /// Weights are stored divided by this value.
    pub weight_scale: f64,
    /// sRGB diffuse albedo.
    pub diffuse: String,
    /// Tangent-space normals encoded as `0.5 + 0.5 n`.
    pub normal: String,
    /// sRGB GGX reflectivity.
    pub specular: String,
    /// Linear GGX roughness.
    pub roughness: String,
    /// sRGB metallic-roughness base colour.
    pub albedo: String,
    /// Linear occlusion, perceptual roughness and metallic.
    pub orm: String,
    /// sRGB constant term, when estimated.
    pub constant: Option<String>,
    /// Serialized basis.
    pub basis: String,
    /// Comma separated basis table.
    pub basis_table: String,
}

impl MaterialManifest {
    /// Texture raster size.
    pub fn size(&self) -> ImageSize {
        [self.width, self.height].into()
    }

    /// Read the manifest of the fit stored in `dir`.
    pub fn read(dir: impl AsRef<Path>) -> Result<Self, FitError> {
        let path = dir.as_ref().join(MANIFEST_FILE);
        let file = std::fs::File::open(&path).map_err(specfit_io::IoError::from)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

/// Names of the weight images for `count` basis functions.
///
/// Combined images are named after the first and last basis index they
/// have room for, e.g. `weights0003.png` even when fewer than four basis
/// functions remain; single images after their index.
pub fn weight_image_names(count: usize, combined: bool) -> Vec<String> {
    if combined {
        (0..count)
            .step_by(WEIGHTS_PER_IMAGE)
            .map(|first| {
                let last = first + WEIGHTS_PER_IMAGE - 1;
                format!("weights{first:02}{last:02}.png")
            })
            .collect()
    } else {
        (0..count).map(|b| format!("weights{b:02}.png")).collect()
    }
}

fn weight_channels<const C: usize>(
    weights: &WeightMap,
    first: usize,
    scale: f64,
) -> Image<f32, C> {
    let size = weights.size();
    Image::from_fn(size, |x, y| {
        let w = weights.texel(y * size.width + x);
        std::array::from_fn(|k| w.get(first + k).map_or(0.0, |&v| (v / scale) as f32))
    })
}

/// The basis as text: `Red#b`, `Green#b` and `Blue#b` lines holding the
/// specular table of every basis function, then one `Diffuse#b, r, g, b`
/// line per basis function.
pub fn basis_table_text(basis: &BasisSet) -> String {
    let mut text = String::new();
    for b in 0..basis.count() {
        let table = basis.specular_table(b);
        for (c, channel) in ["Red", "Green", "Blue"].iter().enumerate() {
            text.push_str(&format!("{channel}#{b}"));
            for value in table {
                text.push_str(&format!(", {}", value[c]));
            }
            text.push('\n');
        }
    }
    for b in 0..basis.count() {
        let [r, g, bl] = basis.diffuse(b);
        text.push_str(&format!("Diffuse#{b}, {r:.6}, {g:.6}, {bl:.6}\n"));
    }
    text
}

fn encode_normals(normals: &Image<f32, 3>) -> Image<f32, 3> {
    normals.map(|&v| 0.5 + 0.5 * v)
}

fn decode_normals(encoded: &Image<f32, 3>) -> Image<f32, 3> {
    let size = encoded.size();
    let data = encoded.as_slice();
    Image::from_fn(size, |x, y| {
        let i = 3 * (y * size.width + x);
        let n = DVec3::new(
            2.0 * data[i] as f64 - 1.0,
            2.0 * data[i + 1] as f64 - 1.0,
            2.0 * data[i + 2] as f64 - 1.0,
        );
        let n = n.try_normalize().unwrap_or(DVec3::Z);
        [n.x as f32, n.y as f32, n.z as f32]
    })
}

/// Write every artifact of `solution` into `dir`.
///
/// Failed writes are recorded in `diagnostics`; the remaining artifacts are
/// still written.
///
/// # Returns
///
/// The paths that were written.
pub fn save_fit(
    dir: impl AsRef<Path>,
    solution: &FitSolution,
    settings: &FitSettings,
    diagnostics: &mut FitDiagnostics,
) -> Vec<PathBuf> {
    let dir = dir.as_ref();
    let mut written = Vec::new();
    if let Err(err) = std::fs::create_dir_all(dir) {
        diagnostics.record_io_failure(STAGE, dir.display().to_string(), err);
        return written;
    }

    let mut attempt = |name: &str, result: Result<(), FitError>| {
        let path = dir.join(name);
        match result {
            Ok(()) => written.push(path),
            Err(err) => diagnostics.record_io_failure(STAGE, path.display().to_string(), err),
        }
    };

    let combined = settings.export.combine_weights;
    let weights = &solution.weights;
    let weight_scale = weights.as_slice().iter().copied().fold(1.0, f64::max);
    let weight_images = weight_image_names(weights.count(), combined);
    for (i, name) in weight_images.iter().enumerate() {
        let path = dir.join(name);
        let result = if combined {
            let first = i * WEIGHTS_PER_IMAGE;
            let image: Image<f32, 4> = weight_channels(weights, first, weight_scale);
            write_image_f32_rgba(&path, &image)
        } else {
            let image: Image<f32, 1> = weight_channels(weights, i, weight_scale);
            write_image_f32_gray(&path, &image)
        };
        attempt(name, result.map_err(FitError::from));
    }

    let material = &solution.material;
    let srgb = |image: &Image<f32, 3>, path: PathBuf| -> Result<(), FitError> {
        Ok(write_image_f32_rgb(path, &srgb_image_from_linear(image))?)
    };
    attempt("diffuse.png", srgb(&material.diffuse, dir.join("diffuse.png")));
    attempt(
        "normal.png",
        write_image_f32_rgb(dir.join("normal.png"), &encode_normals(&material.normal))
            .map_err(FitError::from),
    );
    attempt("specular.png", srgb(&material.specular, dir.join("specular.png")));
    attempt(
        "roughness.png",
        write_image_f32_gray(dir.join("roughness.png"), &material.roughness)
            .map_err(FitError::from),
    );
    if let Some(constant) = &material.constant {
        attempt("constant.png", srgb(constant, dir.join("constant.png")));
    }
    match estimate_albedo_orm(material) {
        Ok(maps) => {
            attempt("albedo.png", srgb(&maps.albedo, dir.join("albedo.png")));
            attempt(
                "orm.png",
                write_image_f32_rgb(dir.join("orm.png"), &maps.orm).map_err(FitError::from),
            );
        }
        Err(err) => attempt("albedo.png", Err(err)),
    }

    attempt(BASIS_FILE, write_json(&dir.join(BASIS_FILE), &solution.basis));
    attempt(
        BASIS_TABLE_FILE,
        std::fs::write(dir.join(BASIS_TABLE_FILE), basis_table_text(&solution.basis))
            .map_err(|err| specfit_io::IoError::from(err).into()),
    );

    let size = solution.size();
    let manifest = MaterialManifest {
        width: size.width,
        height: size.height,
        basis_count: solution.basis.count(),
        basis_resolution: solution.basis.resolution(),
        metallicity: settings.specular.metallicity,
        masking_shadowing: settings.specular.masking_shadowing_enabled,
        weight_images,
        combined_weights: combined,
        weight_scale,
        diffuse: "diffuse.png".to_string(),
        normal: "normal.png".to_string(),
        specular: "specular.png".to_string(),
        roughness: "roughness.png".to_string(),
        albedo: "albedo.png".to_string(),
        orm: "orm.png".to_string(),
        constant: material.constant.as_ref().map(|_| "constant.png".to_string()),
        basis: BASIS_FILE.to_string(),
        basis_table: BASIS_TABLE_FILE.to_string(),
    };
    attempt(MANIFEST_FILE, write_json(&dir.join(MANIFEST_FILE), &manifest));
    attempt(GLTF_FILE, GltfDocument::from_manifest(&manifest).write(dir.join(GLTF_FILE)));

    log::info!("exported {} artifacts to {}", written.len(), dir.display());
    written
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<(), FitError> {
    let file = std::fs::File::create(path).map_err(specfit_io::IoError::from)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), value)?;
    Ok(())
}

/// Read a fit written by [`save_fit`].
///
/// Values come back with 16-bit quantization.
pub fn load_fit(dir: impl AsRef<Path>) -> Result<FitSolution, FitError> {
    let dir = dir.as_ref();
    let manifest = MaterialManifest::read(dir)?;
    let size = manifest.size();

    let file = std::fs::File::open(dir.join(&manifest.basis)).map_err(specfit_io::IoError::from)?;
    let basis: BasisSet = serde_json::from_reader(std::io::BufReader::new(file))?;
    if !basis.is_consistent() || basis.count() != manifest.basis_count {
        return Err(FitError::CountMismatch {
            stage: "load",
            what: "basis functions",
            expected: manifest.basis_count,
            actual: basis.count(),
        });
    }

    let count = manifest.basis_count;
    let expected_images = weight_image_names(count, manifest.combined_weights).len();
    if manifest.weight_images.len() != expected_images {
        return Err(FitError::CountMismatch {
            stage: "load",
            what: "weight images",
            expected: expected_images,
            actual: manifest.weight_images.len(),
        });
    }
    let mut weights = WeightMap::filled(size, count, 0.0);
    let per_image = if manifest.combined_weights {
        WEIGHTS_PER_IMAGE
    } else {
        1
    };
    for (i, name) in manifest.weight_images.iter().enumerate() {
        let path = dir.join(name);
        let (values, channels) = if manifest.combined_weights {
            let image = read_image_f32_rgba(&path)?;
            FitError::check_size("load", name.clone(), size, image.size())?;
            (image.into_vec(), 4)
        } else {
            let image = read_image_f32_gray(&path)?;
            FitError::check_size("load", name.clone(), size, image.size())?;
            (image.into_vec(), 1)
        };
        for t in 0..size.num_pixels() {
            let texel = weights.texel_mut(t);
            for k in 0..per_image {
                if let Some(w) = texel.get_mut(i * per_image + k) {
                    *w = values[t * channels + k] as f64 * manifest.weight_scale;
                }
            }
        }
    }

    let read_rgb = |name: &str| -> Result<Image<f32, 3>, FitError> {
        let image = read_image_f32_rgb(dir.join(name))?;
        FitError::check_size("load", name.to_string(), size, image.size())?;
        Ok(image)
    };
    let roughness = read_image_f32_gray(dir.join(&manifest.roughness))?;
    FitError::check_size("load", manifest.roughness.clone(), size, roughness.size())?;

    let material = MaterialEstimate {
        diffuse: linear_image_from_srgb(&read_rgb(&manifest.diffuse)?),
        normal: decode_normals(&read_rgb(&manifest.normal)?),
        specular: linear_image_from_srgb(&read_rgb(&manifest.specular)?),
        roughness,
        constant: match &manifest.constant {
            Some(name) => Some(linear_image_from_srgb(&read_rgb(name)?)),
            None => None,
        },
    };

    Ok(FitSolution {
        basis,
        weights,
        material,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn weight_names() {
        assert_eq!(
            weight_image_names(6, true),
            vec!["weights0003.png", "weights0407.png"]
        );
        assert_eq!(weight_image_names(2, true), vec!["weights0003.png"]);
        assert_eq!(
            weight_image_names(2, false),
            vec!["weights00.png", "weights01.png"]
        );
    }

    fn solution(count: usize) -> Result<FitSolution, FitError> {
        let size: ImageSize = [3, 2].into();
        let mut basis = BasisSet::zeros(count, 4);
        for b in 0..count {
            basis.set(b, [0.1 * b as f64, 0.2, 0.3], vec![[0.5 / (b + 1) as f64; 3]; 5]);
        }
        let mut weights = WeightMap::filled(size, count, 0.0);
        for t in 0..size.num_pixels() {
            weights.texel_mut(t)[t % count] = 1.0;
        }
        let mut material = MaterialEstimate::flat(size)?;
        material.diffuse = Image::from_fn(size, |x, y| [0.1 * x as f32, 0.2 * y as f32, 0.5]);
        material.normal = Image::from_fn(size, |x, _| {
            let n = DVec3::new(0.2 * x as f64, -0.1, 1.0).normalize();
            [n.x as f32, n.y as f32, n.z as f32]
        });
        material.roughness = Image::from_fn(size, |x, _| [0.1 + 0.3 * x as f32]);
        material.constant = Some(Image::from_size_val(size, 0.05)?);
        Ok(FitSolution {
            basis,
            weights,
            material,
        })
    }

    #[test]
    fn artifacts_load_back() -> Result<(), FitError> {
        let tmp_dir = tempfile::tempdir().map_err(specfit_io::IoError::from)?;
        for combine_weights in [true, false] {
            let dir = tmp_dir.path().join(format!("combined_{combine_weights}"));
            let solution = solution(5)?;
            let mut settings = FitSettings::default();
            settings.export.combine_weights = combine_weights;
            let mut diagnostics = FitDiagnostics::default();

            let written = save_fit(&dir, &solution, &settings, &mut diagnostics);
            assert!(diagnostics.io_failures.is_empty());
            let images = if combine_weights { 2 } else { 5 };
            // weights, 7 maps, two basis files, manifest and glTF
            assert_eq!(written.len(), images + 11);

            let loaded = load_fit(&dir)?;
            assert_eq!(loaded.basis, solution.basis);
            assert_eq!(loaded.weights, solution.weights);
            for (a, b) in loaded
                .material
                .diffuse
                .as_slice()
                .iter()
                .zip(solution.material.diffuse.as_slice())
            {
                assert_relative_eq!(*a, *b, epsilon = 1e-3);
            }
            for (a, b) in loaded
                .material
                .normal
                .as_slice()
                .iter()
                .zip(solution.material.normal.as_slice())
            {
                assert_relative_eq!(*a, *b, epsilon = 1e-4);
            }
            assert!(loaded.material.constant.is_some());

            let manifest = MaterialManifest::read(&dir)?;
            assert_eq!(manifest.basis_count, 5);
            assert_eq!(manifest.weight_scale, 1.0);
        }
        Ok(())
    }

    #[test]
    fn unwritable_directory_is_recorded() -> Result<(), FitError> {
        let tmp_dir = tempfile::tempdir().map_err(specfit_io::IoError::from)?;
        let blocker = tmp_dir.path().join("file");
        std::fs::write(&blocker, b"x").map_err(specfit_io::IoError::from)?;

        let mut diagnostics = FitDiagnostics::default();
        let settings = FitSettings::default();
        let written = save_fit(blocker.join("out"), &solution(2)?, &settings, &mut diagnostics);
        assert!(written.is_empty());
        assert_eq!(diagnostics.io_failures.len(), 1);
        Ok(())
    }

    #[test]
    fn basis_table_lines() {
        let mut basis = BasisSet::zeros(2, 1);
        basis.set(1, [0.25, 0.5, 1.0], vec![[1.0, 2.0, 3.0], [0.5, 0.0, 0.25]]);
        let text = basis_table_text(&basis);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 8);
        assert_eq!(lines[0], "Red#0, 0, 0");
        assert_eq!(lines[3], "Red#1, 1, 0.5");
        assert_eq!(lines[5], "Blue#1, 3, 0.25");
        assert_eq!(lines[7], "Diffuse#1, 0.250000, 0.500000, 1.000000");
    }
}
