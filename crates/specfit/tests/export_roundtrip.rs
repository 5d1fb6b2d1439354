use specfit::accumulator::ErrorDomain;
use specfit::diagnostics::FitDiagnostics;
use specfit::export::{load_fit, MaterialManifest};
use specfit::model::{ReconstructionMethod, ReflectanceModel};
use specfit::progress::NoProgress;
use specfit::reconstruction::FinalReconstruction;
use specfit::render::TexelSplatRenderer;
use specfit::synthetic::SyntheticScene;
use specfit::{FitError, FitSettings, SpecularFitPipeline};

#[test]
fn artifacts_reproduce_reconstruction_error() -> Result<(), FitError> {
    let tmp_dir = tempfile::tempdir().map_err(specfit_io::IoError::from)?;
    let out = tmp_dir.path();

    let capture = SyntheticScene {
        texture_size: [4, 4].into(),
        elevations: vec![30.0, 70.0],
        azimuth_count: 3,
        ..Default::default()
    }
    .build()?;

    let mut settings = FitSettings::default();
    settings.specular.basis_count = 2;
    settings.specular.basis_resolution = 30;
    settings.specular.constant_term_enabled = true;
    settings.reconstruction.reconstruct_all = true;
    let output = SpecularFitPipeline::new(settings.clone()).run(&capture, None, Some(out))?;
    assert!(output.diagnostics.io_failures.is_empty());

    for name in [
        "weights0003.png",
        "albedo.png",
        "orm.png",
        "basisFunctions.csv",
        "material.gltf",
        "diffuse.png",
        "normal.png",
        "specular.png",
        "roughness.png",
        "constant.png",
        "basis.json",
        "material.json",
        "rmse.txt",
        "basis/0000.png",
        "basis/rmse.txt",
        "reflectivity/0005.png",
        "groundTruth/0005.png",
    ] {
        assert!(out.join(name).exists(), "missing {name}");
    }
    let rmse_text =
        std::fs::read_to_string(out.join("rmse.txt")).map_err(specfit_io::IoError::from)?;
    assert!(rmse_text.starts_with("basis, "));
    assert!(rmse_text.contains("\nreflectivity (sRGB), "));

    let loaded = load_fit(out)?;
    let manifest = MaterialManifest::read(out)?;
    assert_eq!(manifest.basis_count, 2);
    assert_eq!(loaded.basis, output.solution.basis);

    let model = ReflectanceModel::new(&loaded, manifest.metallicity, manifest.masking_shadowing);
    let report = FinalReconstruction::new(&settings.reconstruction, &TexelSplatRenderer).run(
        &capture,
        &model,
        None,
        &mut FitDiagnostics::default(),
        &NoProgress,
    )?;
    let direct = output.report.ok_or(FitError::InsufficientData { stage: "test" })?;
    for method in ReconstructionMethod::ALL {
        for domain in [ErrorDomain::Linear, ErrorDomain::Srgb] {
            let a = direct.rmse(method, domain).unwrap_or(f64::NAN);
            let b = report.rmse(method, domain).unwrap_or(f64::NAN);
            assert!((a - b).abs() < 1e-3, "{}{}: {a} vs {b}", method.label(), domain.suffix());
        }
    }
    Ok(())
}
