use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use dicom_volume_render::{
    CliArgs, Command, IsosurfacePipeline, RayCastPipeline, Settings, init_logging,
};

fn main() -> Result<()> {
    init_logging();

    let args = CliArgs::parse();
    let mut settings =
        Settings::load(args.config.as_deref()).context("failed to load configuration")?;
    settings
        .apply_cli(&args)
        .context("invalid command-line arguments")?;

    let run_isosurface = !matches!(args.command, Some(Command::Raycast { .. }));
    let run_raycast = !matches!(args.command, Some(Command::Isosurface { .. }));

    if run_isosurface {
        let report = IsosurfacePipeline::run(&settings).with_context(|| {
            format!(
                "isosurface run failed for {}",
                settings.input.dicom_dir.display()
            )
        })?;
        info!(
            triangles = report.triangle_count,
            vertices = report.vertex_count,
            extraction_ms = report.extraction_time.as_millis() as u64,
            stl = %report.stl_path.display(),
            "isosurface done"
        );
    }

    if run_raycast {
        let report = RayCastPipeline::run(&settings).with_context(|| {
            format!(
                "ray-cast run failed for {}",
                settings.input.dicom_dir.display()
            )
        })?;
        info!(
            render_ms = report.render_time.as_millis() as u64,
            image = %report.image.display(),
            "ray cast done"
        );
    }

    Ok(())
}
