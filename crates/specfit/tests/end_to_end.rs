use approx::assert_relative_eq;
use specfit::accumulator::ErrorDomain;
use specfit::diagnostics::FitDiagnostics;
use specfit::model::{ReconstructionMethod, ReflectanceModel};
use specfit::progress::NoProgress;
use specfit::reconstruction::FinalReconstruction;
use specfit::render::TexelSplatRenderer;
use specfit::synthetic::SyntheticScene;
use specfit::{FitError, FitSettings, SpecularFitPipeline};
use specfit_image::Image;

fn lambertian_texel() -> SyntheticScene {
    SyntheticScene {
        texture_size: [1, 1].into(),
        extent: 0.01,
        elevations: vec![40.0, 60.0, 80.0],
        azimuth_count: 1,
        albedo: [0.5; 3],
        f0: [0.0; 3],
        ..Default::default()
    }
}

#[test]
fn lambertian_texel_needs_no_lobe() -> Result<(), FitError> {
    let capture = lambertian_texel().build()?;
    assert_eq!(capture.view_set.len(), 3);

    let mut settings = FitSettings::default();
    settings.specular.basis_count = 1;
    let output = SpecularFitPipeline::new(settings).run(&capture, None, None)?;

    let basis = &output.solution.basis;
    assert!(basis
        .specular_table(0)
        .iter()
        .flatten()
        .all(|v| v.abs() < 1e-4));
    assert_relative_eq!(basis.diffuse(0)[0], 0.5, epsilon = 1e-4);
    for &d in output.solution.material.diffuse.as_slice() {
        assert_relative_eq!(d, 0.5, epsilon = 1e-4);
    }

    let report = output.report.ok_or(FitError::InsufficientData { stage: "test" })?;
    for method in ReconstructionMethod::ALL {
        let rmse = report
            .rmse(method, ErrorDomain::Linear)
            .ok_or(FitError::InsufficientData { stage: "test" })?;
        assert!(rmse < 1e-4, "{}: {rmse}", method.label());
    }
    Ok(())
}

#[test]
fn occluded_view_matches_omitted_view() -> Result<(), FitError> {
    let base = SyntheticScene {
        texture_size: [4, 4].into(),
        elevations: vec![35.0, 60.0, 80.0],
        azimuth_count: 1,
        roughness: 0.2,
        ..Default::default()
    };
    let occluded = SyntheticScene {
        occluded_views: vec![1],
        ..base.clone()
    }
    .build()?;
    let omitted = SyntheticScene {
        elevations: vec![35.0, 80.0],
        ..base.clone()
    }
    .build()?;

    let mut settings = FitSettings::default();
    settings.specular.basis_count = 2;
    settings.specular.basis_resolution = 30;
    settings.reconstruction.reconstruct_all = true;
    let output = SpecularFitPipeline::new(settings.clone()).run(&occluded, None, None)?;

    let model = ReflectanceModel::new(
        &output.solution,
        settings.specular.metallicity,
        settings.specular.masking_shadowing_enabled,
    );
    let stage = FinalReconstruction::new(&settings.reconstruction, &TexelSplatRenderer);
    let mut diagnostics = FitDiagnostics::default();
    let with_occluded = stage.run(&occluded, &model, None, &mut diagnostics, &NoProgress)?;
    let without = stage.run(&omitted, &model, None, &mut diagnostics, &NoProgress)?;

    assert_eq!(with_occluded.entries.len(), without.entries.len());
    for (a, b) in with_occluded.entries.iter().zip(&without.entries) {
        assert_eq!(a.label, b.label);
        assert!(a.value.is_finite());
        assert_relative_eq!(a.value, b.value, max_relative = 1e-12);
    }
    // the occluded view contributes nothing
    let view1 = with_occluded
        .views
        .iter()
        .find(|v| v.view == 1)
        .ok_or(FitError::InsufficientData { stage: "test" })?;
    assert_eq!(view1.linear.sum_weight, 0.0);
    assert!(view1.linear.rmse().is_nan());
    Ok(())
}

#[test]
fn decomposition_is_monotone_and_nonnegative() -> Result<(), FitError> {
    let size = [4, 4].into();
    let capture = SyntheticScene {
        texture_size: size,
        albedo_map: Some(Image::from_fn(size, |x, y| {
            [0.2 + 0.15 * x as f32, 0.3, 0.6 - 0.1 * y as f32]
        })),
        f0: [0.05, 0.04, 0.03],
        roughness: 0.25,
        ..Default::default()
    }
    .build()?;

    let mut settings = FitSettings::default();
    settings.specular.basis_count = 3;
    settings.specular.basis_resolution = 30;
    settings.specular.max_iterations = 8;
    settings.specular.convergence_tolerance = 0.0;
    settings.reconstruction.enabled = false;
    let output = SpecularFitPipeline::new(settings).run(&capture, None, None)?;

    let history = &output.error_history;
    assert!(history.len() >= 2);
    for pair in history.windows(2) {
        assert!(pair[1] <= pair[0] * (1.0 + 1e-9) + 1e-12, "{history:?}");
    }
    assert!(history[history.len() - 1] < history[0]);
    assert!(output.solution.weights.is_nonnegative());
    assert!(output.solution.basis.is_nonnegative());
    assert!(output.report.is_none());
    Ok(())
}

#[test]
fn empty_capture_is_insufficient() -> Result<(), FitError> {
    let capture = SyntheticScene {
        texture_size: [2, 2].into(),
        azimuth_count: 1,
        elevations: vec![45.0],
        occluded_views: vec![0],
        ..Default::default()
    }
    .build()?;
    let result = SpecularFitPipeline::new(FitSettings::default()).run(&capture, None, None);
    assert!(matches!(result, Err(FitError::InsufficientData { .. })));
    Ok(())
}
