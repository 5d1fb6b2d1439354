use std::path::PathBuf;
use std::sync::Arc;

use argh::FromArgs;
use specfit::progress::LogProgress;
use specfit::synthetic::SyntheticScene;
use specfit::{FitSettings, SpecularFitPipeline};

/// Fits a specular basis to a synthetic capture and writes the artifacts
#[derive(Debug, FromArgs)]
struct Args {
    /// output directory
    #[argh(option, short = 'o', default = "PathBuf::from(\"specfit_output\")")]
    output: PathBuf,

    /// optional json file with fit settings
    #[argh(option, short = 's')]
    settings: Option<PathBuf>,

    /// texture width and height in texels
    #[argh(option, short = 't', default = "16")]
    texture_size: usize,

    /// ground truth GGX roughness
    #[argh(option, short = 'r', default = "0.3")]
    roughness: f64,

    /// relative observation noise
    #[argh(option, short = 'n', default = "0.0")]
    noise: f64,

    /// enable per-texel normal refinement
    #[argh(switch)]
    refine_normals: bool,

    /// reconstruct and write every view
    #[argh(switch, short = 'a')]
    reconstruct_all: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut settings = match &args.settings {
        Some(path) => FitSettings::from_json_file(path)?,
        None => FitSettings::default(),
    };
    settings.normal.enabled |= args.refine_normals;
    settings.reconstruction.reconstruct_all |= args.reconstruct_all;

    let size = args.texture_size;
    let scene = SyntheticScene {
        texture_size: [size, size].into(),
        roughness: args.roughness,
        noise: args.noise,
        ..Default::default()
    };
    let capture = scene.build()?;
    log::info!(
        "synthetic capture: {} views, {}x{} texels",
        capture.view_set.len(),
        size,
        size
    );

    let progress = Arc::new(LogProgress::new());
    ctrlc::set_handler({
        let progress = progress.clone();
        move || {
            println!("Received Ctrl-C signal. Cancelling at the next iteration boundary.");
            progress.cancel();
        }
    })?;

    std::fs::create_dir_all(&args.output)?;
    settings.to_json_file(args.output.join("settings.json"))?;

    let output = SpecularFitPipeline::new(settings)
        .with_progress(progress)
        .run(&capture, None, Some(&args.output))?;

    if let Some(report) = &output.report {
        print!("{}", report.to_text());
    }
    println!(
        "wrote {} artifacts to {} ({} failures)",
        output.written.len(),
        args.output.display(),
        output.diagnostics.io_failures.len()
    );

    Ok(())
}
