use serde::{Deserialize, Serialize};

use crate::settings::SpecularBasisSettings;
use crate::shading::smoothstep;

/// Monotone lobe shapes from which every basis function is assembled.
///
/// Function `k` is `1` near the peak, falls off with a smoothstep ramp and
/// is `0` beyond its cut-off bin. Cut-offs are spread evenly between
/// `min_width` and the table end, so nonnegative combinations are
/// nonnegative, monotonically decreasing and never narrower than `min_width`.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothStepLibrary {
    resolution: usize,
    functions: Vec<Vec<f64>>,
}

impl SmoothStepLibrary {
    /// Build a library of `complexity` functions over `resolution + 1` bins.
    pub fn new(resolution: usize, min_width: usize, max_width: usize, complexity: usize) -> Self {
        let span = resolution.saturating_sub(min_width) as f64;
        let functions = (0..complexity.max(1))
            .map(|k| {
                let r = if complexity > 1 {
                    k as f64 * span / (complexity - 1) as f64
                } else {
                    span
                };
                let cutoff = r + min_width as f64;
                let ramp = cutoff.min(max_width as f64);
                (0..=resolution)
                    .map(|i| {
                        let i = i as f64;
                        if i >= cutoff {
                            return 0.0;
                        }
                        let d = cutoff - i;
                        if d < ramp {
                            smoothstep(d / ramp)
                        } else {
                            1.0
                        }
                    })
                    .collect()
            })
            .collect();
        Self {
            resolution,
            functions,
        }
    }

    /// The library described by basis settings.
    pub fn from_settings(settings: &SpecularBasisSettings) -> Self {
        Self::new(
            settings.basis_resolution,
            settings.min_width(),
            settings.max_width(),
            settings.basis_complexity(),
        )
    }

    /// Number of functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// `true` when the library is empty, which never happens for a built library.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Number of angular steps.
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Table of function `k`.
    pub fn function(&self, k: usize) -> &[f64] {
        &self.functions[k]
    }

    /// Value of function `k` at continuous index `m`.
    pub fn value_at(&self, k: usize, m: f64) -> f64 {
        interpolate(&self.functions[k], m)
    }
}

/// Linear interpolation in a table at continuous index `m`, clamped to its ends.
pub fn interpolate(table: &[f64], m: f64) -> f64 {
    let Some(last) = table.len().checked_sub(1) else {
        return 0.0;
    };
    let m = m.clamp(0.0, last as f64);
    let i0 = (m.floor() as usize).min(last);
    let i1 = (i0 + 1).min(last);
    let a = m - i0 as f64;
    table[i0] * (1.0 - a) + table[i1] * a
}

/// The global basis: an RGB diffuse colour and a tabulated RGB specular lobe per basis.
///
/// Tables have `resolution + 1` bins indexed by [`crate::shading::halfway_index`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasisSet {
    resolution: usize,
    diffuse: Vec<[f64; 3]>,
    specular: Vec<Vec<[f64; 3]>>,
}

impl BasisSet {
    /// A basis of `count` functions that are zero everywhere.
    pub fn zeros(count: usize, resolution: usize) -> Self {
        Self {
            resolution,
            diffuse: vec![[0.0; 3]; count],
            specular: vec![vec![[0.0; 3]; resolution + 1]; count],
        }
    }

    /// Number of basis functions.
    pub fn count(&self) -> usize {
        self.diffuse.len()
    }

    /// Number of angular steps.
    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Diffuse albedo of basis `b`.
    pub fn diffuse(&self, b: usize) -> [f64; 3] {
        self.diffuse[b]
    }

    /// Specular table of basis `b`.
    pub fn specular_table(&self, b: usize) -> &[[f64; 3]] {
        &self.specular[b]
    }

    /// Replace basis `b`.
    ///
    /// The table must have `resolution + 1` bins.
    pub fn set(&mut self, b: usize, diffuse: [f64; 3], table: Vec<[f64; 3]>) {
        debug_assert_eq!(table.len(), self.resolution + 1);
        self.diffuse[b] = diffuse;
        self.specular[b] = table;
    }

    /// Specular value of basis `b` at continuous index `m`.
    pub fn specular_at(&self, b: usize, m: f64) -> [f64; 3] {
        let table = &self.specular[b];
        let last = table.len() - 1;
        let m = m.clamp(0.0, last as f64);
        let i0 = (m.floor() as usize).min(last);
        let i1 = (i0 + 1).min(last);
        let a = m - i0 as f64;
        std::array::from_fn(|c| table[i0][c] * (1.0 - a) + table[i1][c] * a)
    }

    /// Weighted sum of the diffuse colours.
    pub fn weighted_diffuse(&self, weights: &[f64]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (w, d) in weights.iter().zip(&self.diffuse) {
            out.iter_mut().zip(d).for_each(|(o, d)| *o += w * d);
        }
        out
    }

    /// Weighted sum of the specular lobes at continuous index `m`.
    pub fn weighted_specular(&self, weights: &[f64], m: f64) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (b, &w) in weights.iter().enumerate().take(self.count()) {
            if w == 0.0 {
                continue;
            }
            let s = self.specular_at(b, m);
            out.iter_mut().zip(s).for_each(|(o, s)| *o += w * s);
        }
        out
    }

    /// Whether every diffuse and specular value is nonnegative.
    pub fn is_nonnegative(&self) -> bool {
        self.diffuse.iter().flatten().all(|&v| v >= 0.0)
            && self.specular.iter().flatten().flatten().all(|&v| v >= 0.0)
    }

    /// Whether every table has the declared number of bins.
    pub fn is_consistent(&self) -> bool {
        self.specular.len() == self.diffuse.len()
            && self.specular.iter().all(|t| t.len() == self.resolution + 1)
    }
}
