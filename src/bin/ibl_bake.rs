//! Command line IBL bake.
//!
//! Bakes every configured HDR source and logs a summary of the resulting
//! maps. The BRDF lookup texture can be exported as a 16-bit PNG.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use pbr_ibl::backend::RenderContext;
use pbr_ibl::{BackendType, BakeConfig, HdrSource, IblError, IblResourceSet, IblResult};

/// Backend selection for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    /// Use wgpu when an adapter is available, the software backend otherwise.
    #[default]
    Auto,
    /// CPU reference backend.
    Software,
    /// Headless GPU backend via wgpu.
    Wgpu,
}

#[derive(Parser, Debug)]
#[command(
    name = "ibl-bake",
    about = "Bake IBL cubemaps and the BRDF LUT from equirectangular HDR images",
    version
)]
struct Args {
    /// TOML bake configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// HDR panorama to bake. Repeat for several sources; replaces the
    /// sources listed in the configuration.
    #[arg(long = "hdr")]
    hdr: Vec<PathBuf>,

    /// Render backend.
    #[arg(long, default_value = "auto", value_enum)]
    backend: CliBackend,

    /// Write the BRDF LUT to this path as a 16-bit PNG.
    #[arg(long)]
    brdf_lut_png: Option<PathBuf>,
}

fn create_context(backend: CliBackend) -> IblResult<Box<dyn RenderContext>> {
    match backend {
        CliBackend::Software => BackendType::Software.create_context(),
        CliBackend::Wgpu => BackendType::Wgpu.create_context(),
        CliBackend::Auto => BackendType::Wgpu.create_context().or_else(|e| {
            log::warn!("wgpu backend unavailable ({}), using software backend", e);
            BackendType::Software.create_context()
        }),
    }
}

/// Store (scale, bias) as red and green, row 0 at roughness 0.
fn write_brdf_lut_png(
    ctx: &mut dyn RenderContext,
    set: &IblResourceSet,
    path: &Path,
) -> IblResult<()> {
    let desc = ctx.texture_info(set.brdf_lut())?;
    let texels = ctx.read_texture(set.brdf_lut(), 0, 0)?;
    let to_u16 = |v: f32| (v.clamp(0.0, 1.0) * u16::MAX as f32).round() as u16;

    let mut png = image::ImageBuffer::<image::Rgb<u16>, Vec<u16>>::new(desc.width, desc.height);
    for (pixel, texel) in png.pixels_mut().zip(&texels) {
        *pixel = image::Rgb([to_u16(texel[0]), to_u16(texel[1]), 0]);
    }
    png.save(path).map_err(|source| IblError::ImageWrite {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("Wrote BRDF LUT to {}", path.display());
    Ok(())
}

fn run(args: &Args) -> IblResult<()> {
    let mut config = match &args.config {
        Some(path) => BakeConfig::load(path)?,
        None => BakeConfig::default(),
    };
    if !args.hdr.is_empty() {
        config = config.with_sources(args.hdr.iter().map(HdrSource::from_path).collect());
    }

    let mut ctx = create_context(args.backend)?;
    log::info!("Using {} backend", ctx.backend_name());

    let set = IblResourceSet::bake(ctx.as_mut(), &config)?;
    for (index, maps) in set.iter().enumerate() {
        log::info!(
            "[{}] {}: environment {:?}, irradiance {:?}, prefilter {:?}",
            index,
            maps.label,
            maps.environment,
            maps.irradiance,
            maps.prefilter
        );
    }
    set.use_set(ctx.as_mut(), 0)?;
    set.use_environment(ctx.as_mut(), 0)?;

    if let Some(path) = &args.brdf_lut_png {
        write_brdf_lut_png(ctx.as_mut(), &set, path)?;
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("IBL bake failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
