//! Demo driver: composite one region of a calibration container over a
//! media image and write the result to disk.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use mpcdi_warp::mpcdi::MpcdiFile;
use mpcdi_warp::render::SoftwareSurface;
use mpcdi_warp::texture::Texture;
use mpcdi_warp::warp::{BackendFidelity, CompositorConfig, WarpCompositor};

#[derive(Parser)]
#[command(about = "Warp and blend a media image for one projector region")]
struct Args {
    /// Calibration container directory
    container: PathBuf,
    /// Region id within the container
    region: String,
    /// Media image to warp
    media: PathBuf,
    /// Output image path
    #[arg(short, long, default_value = "out.png")]
    output: PathBuf,
    /// Use the fixed-function mesh fallback instead of the per-pixel path
    #[arg(long)]
    fixed_function: bool,
    /// Disable alpha/beta blending (pure warp, for comparison renders)
    #[arg(long)]
    no_blend: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();

    let mpcdi = MpcdiFile::open(&args.container)?;
    let region = mpcdi
        .region(&args.region)
        .with_context(|| format!("container has no region '{}'", args.region))?;

    let config = CompositorConfig {
        fidelity: if args.fixed_function {
            BackendFidelity::FixedFunction
        } else {
            BackendFidelity::PerPixel
        },
        blend_enabled: !args.no_blend,
        ..Default::default()
    };
    let mut compositor = WarpCompositor::new(&mpcdi, region, config)?;

    let media = image::open(&args.media)
        .with_context(|| format!("failed to read media image {:?}", args.media))?;
    compositor.set_media(Texture::from_image(&media));

    let mut surface = SoftwareSurface::new(region.width, region.height);
    let frame = compositor.composite(&mut surface)?;
    frame.to_rgb8().save(&args.output)?;
    log::info!("wrote {:?} ({}x{})", args.output, frame.width(), frame.height());

    Ok(())
}
