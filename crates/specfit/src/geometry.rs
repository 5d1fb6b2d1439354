use glam::DVec3;
use specfit_image::ImageSize;

use crate::error::FitError;

/// Orthonormal tangent frame of a texel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TangentFrame {
    /// Tangent, along increasing texture `x`.
    pub t: DVec3,
    /// Bitangent.
    pub b: DVec3,
    /// Geometric normal.
    pub n: DVec3,
}

impl TangentFrame {
    /// Express a tangent space vector in world coordinates.
    pub fn to_world(&self, v: DVec3) -> DVec3 {
        self.t * v.x + self.b * v.y + self.n * v.z
    }

    /// Express a world vector in tangent space.
    pub fn to_tangent(&self, v: DVec3) -> DVec3 {
        DVec3::new(self.t.dot(v), self.b.dot(v), self.n.dot(v))
    }
}

/// The surface rasterized into texture space.
///
/// Every attribute is stored per texel in row-major order. Texels outside
/// the mesh's UV layout are not covered and are ignored by every stage.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceGeometry {
    size: ImageSize,
    positions: Vec<DVec3>,
    frames: Vec<TangentFrame>,
    coverage: Vec<bool>,
}

impl SurfaceGeometry {
    /// Build the geometry from per-texel attributes.
    ///
    /// Tangents are re-orthogonalized against the normals and the bitangent is
    /// `n × t`. Texels with a degenerate normal are marked uncovered.
    ///
    /// # Arguments
    ///
    /// * `size` - The texture raster size.
    /// * `positions` - World position of every texel.
    /// * `normals` - Geometric world normal of every texel.
    /// * `tangents` - World tangent of every texel.
    /// * `coverage` - Whether the texel lies on the surface.
    pub fn new(
        size: ImageSize,
        positions: Vec<DVec3>,
        normals: Vec<DVec3>,
        tangents: Vec<DVec3>,
        mut coverage: Vec<bool>,
    ) -> Result<Self, FitError> {
        let expected = size.num_pixels();
        for (what, actual) in [
            ("positions", positions.len()),
            ("normals", normals.len()),
            ("tangents", tangents.len()),
            ("coverage", coverage.len()),
        ] {
            if actual != expected {
                return Err(FitError::CountMismatch {
                    stage: "geometry",
                    what,
                    expected,
                    actual,
                });
            }
        }

        let frames = normals
            .iter()
            .zip(&tangents)
            .zip(coverage.iter_mut())
            .map(|((&n, &t), covered)| {
                let n = n.normalize_or_zero();
                if n == DVec3::ZERO {
                    *covered = false;
                    return TangentFrame {
                        t: DVec3::X,
                        b: DVec3::Y,
                        n: DVec3::Z,
                    };
                }
                let t = (t - n * n.dot(t)).normalize_or_zero();
                let t = if t == DVec3::ZERO {
                    n.any_orthonormal_vector()
                } else {
                    t
                };
                TangentFrame { t, b: n.cross(t), n }
            })
            .collect();

        Ok(Self {
            size,
            positions,
            frames,
            coverage,
        })
    }

    /// A flat square patch in the `z = 0` plane, centered at the origin.
    ///
    /// Texture row 0 lies at `+y`; every texel is covered.
    pub fn planar(size: ImageSize, extent: f64) -> Self {
        let (w, h) = (size.width as f64, size.height as f64);
        let positions = (0..size.height)
            .flat_map(|y| {
                (0..size.width).map(move |x| {
                    DVec3::new(
                        ((x as f64 + 0.5) / w - 0.5) * extent,
                        (0.5 - (y as f64 + 0.5) / h) * extent,
                        0.0,
                    )
                })
            })
            .collect();
        let n = size.num_pixels();
        Self {
            size,
            positions,
            frames: vec![
                TangentFrame {
                    t: DVec3::X,
                    b: DVec3::Y,
                    n: DVec3::Z,
                };
                n
            ],
            coverage: vec![true; n],
        }
    }

    /// Texture raster size.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Number of texels, covered or not.
    pub fn num_texels(&self) -> usize {
        self.positions.len()
    }

    /// World position of texel `idx`.
    pub fn position(&self, idx: usize) -> DVec3 {
        self.positions[idx]
    }

    /// Tangent frame of texel `idx`.
    pub fn frame(&self, idx: usize) -> &TangentFrame {
        &self.frames[idx]
    }

    /// Whether texel `idx` lies on the surface.
    pub fn is_covered(&self, idx: usize) -> bool {
        self.coverage.get(idx).copied().unwrap_or(false)
    }

    /// Number of covered texels.
    pub fn covered_count(&self) -> usize {
        self.coverage.iter().filter(|&&c| c).count()
    }
}
