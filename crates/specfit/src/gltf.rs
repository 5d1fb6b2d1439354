use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::FitError;
use crate::export::MaterialManifest;

/// File name of the glTF material document.
pub const GLTF_FILE: &str = "material.gltf";

/// A glTF 2.0 document carrying the fitted material and its textures.
///
/// Geometry is not part of the document; a scene exporter adds meshes
/// that reference material `0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GltfDocument {
    /// Asset metadata.
    pub asset: GltfAsset,
    /// Image files, relative to the document.
    pub images: Vec<GltfImage>,
    /// Textures, one per image.
    pub textures: Vec<GltfTexture>,
    /// The fitted material.
    pub materials: Vec<GltfMaterial>,
}

/// glTF asset metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GltfAsset {
    /// glTF version, always `2.0`.
    pub version: String,
    /// Producing tool.
    pub generator: String,
}

/// A glTF image referenced by URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GltfImage {
    /// Relative file name.
    pub uri: String,
    /// Image name.
    pub name: String,
}

/// A glTF texture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GltfTexture {
    /// Index of the image.
    pub source: usize,
    /// Texture name.
    pub name: String,
}

/// Reference to a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureInfo {
    /// Index of the texture.
    pub index: usize,
}

/// Metallic-roughness parameters of a glTF material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbrMetallicRoughness {
    /// Base colour texture.
    pub base_color_texture: TextureInfo,
    /// ORM texture; glTF reads roughness from green and metallic from blue.
    pub metallic_roughness_texture: TextureInfo,
    /// Metallic multiplier.
    pub metallic_factor: f64,
    /// Roughness multiplier.
    pub roughness_factor: f64,
}

/// Weight textures of the specular basis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecularWeights {
    /// Weights per texture, 4 when combined and 1 otherwise.
    pub stride: usize,
    /// Weight textures in basis order.
    pub textures: Vec<TextureInfo>,
}

/// Basis fit data that glTF has no standard slot for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialExtras {
    /// Final diffuse texture.
    pub diffuse_texture: TextureInfo,
    /// Constant term texture, when estimated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diffuse_constant_texture: Option<TextureInfo>,
    /// GGX reflectivity texture.
    pub specular_texture: TextureInfo,
    /// Basis function table.
    pub basis_functions_uri: String,
    /// Basis weight textures.
    pub specular_weights: SpecularWeights,
}

/// A glTF material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GltfMaterial {
    /// Material name.
    pub name: String,
    /// Standard metallic-roughness parameters.
    pub pbr_metallic_roughness: PbrMetallicRoughness,
    /// Tangent-space normal texture.
    pub normal_texture: TextureInfo,
    /// Occlusion, read from the red channel of the ORM texture.
    pub occlusion_texture: TextureInfo,
    /// Specular basis data.
    pub extras: MaterialExtras,
}

impl GltfDocument {
    /// Build the document for the artifacts listed in `manifest`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use specfit::export::MaterialManifest;
    /// use specfit::gltf::GltfDocument;
    ///
    /// let manifest = MaterialManifest::read("fit")?;
    /// let document = GltfDocument::from_manifest(&manifest);
    /// assert_eq!(document.materials.len(), 1);
    /// # Ok::<(), specfit::FitError>(())
    /// ```
    pub fn from_manifest(manifest: &MaterialManifest) -> Self {
        let mut images = Vec::new();
        let mut textures = Vec::new();
        let mut add = |uri: &str| {
            let name = uri.trim_end_matches(".png").to_string();
            let index = textures.len();
            images.push(GltfImage {
                uri: uri.to_string(),
                name: name.clone(),
            });
            textures.push(GltfTexture {
                source: index,
                name,
            });
            TextureInfo { index }
        };

        let albedo = add(&manifest.albedo);
        let orm = add(&manifest.orm);
        let normal = add(&manifest.normal);
        let diffuse = add(&manifest.diffuse);
        let specular = add(&manifest.specular);
        let constant = manifest.constant.as_deref().map(|c| add(c));
        let weights = manifest.weight_images.iter().map(|w| add(w)).collect();

        Self {
            asset: GltfAsset {
                version: "2.0".to_string(),
                generator: format!("specfit {}", env!("CARGO_PKG_VERSION")),
            },
            images,
            textures,
            materials: vec![GltfMaterial {
                name: "specfit".to_string(),
                pbr_metallic_roughness: PbrMetallicRoughness {
                    base_color_texture: albedo,
                    metallic_roughness_texture: orm,
                    metallic_factor: 1.0,
                    roughness_factor: 1.0,
                },
                normal_texture: normal,
                occlusion_texture: orm,
                extras: MaterialExtras {
                    diffuse_texture: diffuse,
                    diffuse_constant_texture: constant,
                    specular_texture: specular,
                    basis_functions_uri: manifest.basis_table.clone(),
                    specular_weights: SpecularWeights {
                        stride: if manifest.combined_weights { 4 } else { 1 },
                        textures: weights,
                    },
                },
            }],
        }
    }

    /// Write the document as JSON to `path`.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), FitError> {
        let file = std::fs::File::create(path).map_err(specfit_io::IoError::from)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(constant: bool) -> MaterialManifest {
        MaterialManifest {
            width: 4,
            height: 4,
            basis_count: 6,
            basis_resolution: 90,
            metallicity: 0.0,
            masking_shadowing: true,
            weight_images: vec!["weights0003.png".to_string(), "weights0407.png".to_string()],
            combined_weights: true,
            weight_scale: 1.0,
            diffuse: "diffuse.png".to_string(),
            normal: "normal.png".to_string(),
            specular: "specular.png".to_string(),
            roughness: "roughness.png".to_string(),
            albedo: "albedo.png".to_string(),
            orm: "orm.png".to_string(),
            constant: constant.then(|| "constant.png".to_string()),
            basis: "basis.json".to_string(),
            basis_table: "basisFunctions.csv".to_string(),
        }
    }

    #[test]
    fn material_references_every_texture() {
        let document = GltfDocument::from_manifest(&manifest(false));
        assert_eq!(document.images.len(), 7);
        assert_eq!(document.textures.len(), document.images.len());

        let material = &document.materials[0];
        let uri = |info: TextureInfo| {
            document.images[document.textures[info.index].source]
                .uri
                .as_str()
        };
        assert_eq!(uri(material.pbr_metallic_roughness.base_color_texture), "albedo.png");
        assert_eq!(uri(material.pbr_metallic_roughness.metallic_roughness_texture), "orm.png");
        assert_eq!(uri(material.occlusion_texture), "orm.png");
        assert_eq!(uri(material.normal_texture), "normal.png");
        assert_eq!(uri(material.extras.diffuse_texture), "diffuse.png");
        assert_eq!(material.extras.specular_weights.stride, 4);
        let weights: Vec<&str> = material
            .extras
            .specular_weights
            .textures
            .iter()
            .map(|&t| uri(t))
            .collect();
        assert_eq!(weights, ["weights0003.png", "weights0407.png"]);
        assert!(material.extras.diffuse_constant_texture.is_none());
    }

    #[test]
    fn json_uses_gltf_field_names() -> Result<(), FitError> {
        let document = GltfDocument::from_manifest(&manifest(true));
        let value = serde_json::to_value(&document)?;
        let material = &value["materials"][0];
        assert_eq!(value["asset"]["version"], "2.0");
        assert_eq!(material["pbrMetallicRoughness"]["metallicRoughnessTexture"]["index"], 1);
        assert_eq!(material["normalTexture"]["index"], 2);
        assert_eq!(material["extras"]["diffuseConstantTexture"]["index"], 5);
        assert_eq!(material["extras"]["basisFunctionsUri"], "basisFunctions.csv");
        Ok(())
    }
}
