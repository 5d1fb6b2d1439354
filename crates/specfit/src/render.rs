use rayon::prelude::*;
use specfit_image::Image;

use crate::capture::Capture;
use crate::error::FitError;
use crate::model::{ReconstructionMethod, ReflectanceModel};
use crate::samples::world_normal;
use crate::shading::ShadingContext;

/// A view rendered from the fitted model with its matching ground truth.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedView {
    /// Model prediction, linear RGB.
    pub prediction: Image<f32, 3>,
    /// Captured radiance at the same pixels, linear RGB.
    pub ground_truth: Image<f32, 3>,
    /// Validity weight; `0` for pixels no usable texel landed on.
    pub weight: Image<f32, 1>,
}

/// Renders a calibration view of a fitted model.
///
/// This is the seam at which a rasterizer or GPU backend plugs into the
/// reconstruction stage.
pub trait ViewRenderer: Send + Sync {
    /// Render `view` of `capture` with `method`.
    fn render(
        &self,
        capture: &Capture,
        model: &ReflectanceModel<'_>,
        method: ReconstructionMethod,
        view: usize,
    ) -> Result<RenderedView, FitError>;
}

/// CPU renderer that splats every usable texel onto its nearest pixel.
///
/// Texels are shaded in parallel; the depth test is resolved afterwards in
/// texel order, nearest depth winning.
#[derive(Debug, Default, Clone, Copy)]
pub struct TexelSplatRenderer;

struct Splat {
    pixel: usize,
    depth: f64,
    prediction: [f64; 3],
    ground_truth: [f64; 3],
    weight: f64,
}

impl ViewRenderer for TexelSplatRenderer {
    fn render(
        &self,
        capture: &Capture,
        model: &ReflectanceModel<'_>,
        method: ReconstructionMethod,
        view: usize,
    ) -> Result<RenderedView, FitError> {
        let camera = capture.view_set.view(view).ok_or(FitError::CountMismatch {
            stage: "rendering",
            what: "views",
            expected: view + 1,
            actual: capture.view_set.len(),
        })?;
        let observation = &capture.observations[view];
        let context = ShadingContext::for_views(&capture.view_set)[view];
        let normals = &model.solution().material.normal;
        FitError::check_size("rendering", "normal map", capture.texture_size(), normals.size())?;

        let size = camera.image_size;
        let splats: Vec<Splat> = (0..capture.num_texels())
            .into_par_iter()
            .filter_map(|t| {
                if !capture.geometry.is_covered(t) {
                    return None;
                }
                let (ground_truth, weight) = observation.sample(t)?;
                let x = capture.geometry.position(t);
                let sample = context.sample(x, world_normal(capture, normals, t))?;
                let p = camera.project(x)?;
                let px = (p.x.floor() as usize).min(size.width - 1);
                let py = (p.y.floor() as usize).min(size.height - 1);
                Some(Splat {
                    pixel: py * size.width + px,
                    depth: p.depth,
                    prediction: model.radiance(method, t, &sample),
                    ground_truth,
                    weight,
                })
            })
            .collect();

        let mut depth = vec![f64::INFINITY; size.num_pixels()];
        let mut winner: Vec<Option<usize>> = vec![None; size.num_pixels()];
        for (i, splat) in splats.iter().enumerate() {
            if splat.depth < depth[splat.pixel] {
                depth[splat.pixel] = splat.depth;
                winner[splat.pixel] = Some(i);
            }
        }

        let mut prediction = Image::from_size_val(size, 0.0f32)?;
        let mut ground_truth = Image::from_size_val(size, 0.0f32)?;
        let mut weight = Image::from_size_val(size, 0.0f32)?;
        for (pixel, splat) in winner
            .iter()
            .enumerate()
            .filter_map(|(p, w)| w.map(|i| (p, &splats[i])))
        {
            for c in 0..3 {
                prediction.as_slice_mut()[pixel * 3 + c] = splat.prediction[c] as f32;
                ground_truth.as_slice_mut()[pixel * 3 + c] = splat.ground_truth[c] as f32;
            }
            weight.as_slice_mut()[pixel] = splat.weight as f32;
        }

        Ok(RenderedView {
            prediction,
            ground_truth,
            weight,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::BasisSet;
    use crate::material::{FitSolution, MaterialEstimate};
    use crate::synthetic::SyntheticScene;
    use crate::weights::WeightMap;

    #[test]
    fn splats_every_visible_texel_once() -> Result<(), FitError> {
        let capture = SyntheticScene {
            texture_size: [2, 2].into(),
            f0: [0.0; 3],
            ..Default::default()
        }
        .build()?;
        let size = capture.texture_size();
        let mut material = MaterialEstimate::flat(size)?;
        material.diffuse = Image::from_size_val(size, 0.5)?;
        let solution = FitSolution {
            basis: BasisSet::zeros(1, 4),
            weights: WeightMap::uniform(size, 1),
            material,
        };
        let model = ReflectanceModel::new(&solution, 0.0, true);

        let view =
            TexelSplatRenderer.render(&capture, &model, ReconstructionMethod::FinalDiffuse, 0)?;
        let valid = view.weight.as_slice().iter().filter(|&&w| w > 0.0).count();
        assert_eq!(valid, 4);
        for (p, g) in view.prediction.as_slice().iter().zip(view.ground_truth.as_slice()) {
            assert!((p - g).abs() <= 1e-6 * g.abs().max(1.0));
        }

        assert!(TexelSplatRenderer
            .render(&capture, &model, ReconstructionMethod::Basis, 99)
            .is_err());
        Ok(())
    }
}
