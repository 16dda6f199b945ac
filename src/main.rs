use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use glam::Vec3;
use log::{error, info};

use wavefront_tracer::shared::{unpack_color, TracerConfig};
use wavefront_tracer::{Camera, ComputeBackend, HostBackend, PipelineConfig, Scene, WavefrontPipeline, WgpuBackend};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    /// wgpu compute on the best available adapter
    Gpu,
    /// Reference kernels on the CPU
    Host,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Wavefront path tracer rendering the demo scene to a PNG")]
struct Cli {
    #[arg(long, value_enum, default_value_t = Backend::Gpu)]
    backend: Backend,
    #[arg(long, default_value_t = TracerConfig::DEFAULT_WIDTH)]
    width: u32,
    #[arg(long, default_value_t = TracerConfig::DEFAULT_HEIGHT)]
    height: u32,
    #[arg(long, default_value_t = TracerConfig::DEFAULT_FOV)]
    fov: f32,
    #[arg(long, default_value_t = TracerConfig::DEFAULT_MAX_DEPTH)]
    max_depth: u32,
    /// Wavefront iterations; each completes at most one sample per pixel
    #[arg(long, default_value_t = 64)]
    iterations: u32,
    #[arg(long, default_value_t = TracerConfig::DEFAULT_WARP_SIZE)]
    warp_size: u32,
    /// Per-queue capacity in entries (defaults to the pixel count)
    #[arg(long)]
    queue_capacity: Option<u32>,
    /// Directory with the WGSL programs
    #[arg(long)]
    programs: Option<PathBuf>,
    #[arg(long, default_value = "wavefront.png")]
    output: PathBuf,
}

fn render<B: ComputeBackend>(backend: B, cli: &Cli) -> Result<Vec<u32>, Box<dyn Error>> {
    let camera = Camera::new(
        Vec3::ZERO,
        Vec3::Y,
        Vec3::Z,
        cli.width,
        cli.height,
        cli.fov,
        cli.max_depth,
    )?;
    let mut config = PipelineConfig::default().with_warp_size(cli.warp_size);
    if let Some(dir) = &cli.programs {
        config = config.with_program_dir(dir);
    }
    if let Some(capacity) = cli.queue_capacity {
        config = config.with_queue_capacity(capacity);
    }

    let scene = Scene::demo()?;
    let mut pipeline = WavefrontPipeline::new(backend, &scene, camera, config)?;

    let start = Instant::now();
    let mut image = Vec::new();
    for iteration in 1..=cli.iterations {
        image = pipeline.execute()?;
        if iteration % 16 == 0 || iteration == cli.iterations {
            info!("Iteration {iteration}/{} ({:.2?} elapsed)", cli.iterations, start.elapsed());
        }
    }

    let stats = pipeline.stats();
    info!(
        "{} iterations, {} launches, {} skipped, {} queue entries dropped",
        stats.iterations,
        stats.launches,
        stats.skipped_launches,
        stats.total_dropped()
    );
    pipeline.release();
    Ok(image)
}

fn save_png(pixels: &[u32], width: u32, height: u32, path: &PathBuf) -> Result<(), Box<dyn Error>> {
    let bytes: Vec<u8> = pixels.iter().flat_map(|&p| unpack_color(p)).collect();
    let image = image::RgbImage::from_raw(width, height, bytes).ok_or("image size does not match pixel count")?;
    image.save(path)?;
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let pixels = match cli.backend {
        Backend::Gpu => render(WgpuBackend::request()?, &cli)?,
        Backend::Host => render(HostBackend::with_wavefront_kernels(), &cli)?,
    };
    save_png(&pixels, cli.width, cli.height, &cli.output)?;
    info!("Wrote {}", cli.output.display());
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()) {
        error!("{e}");
        std::process::exit(1);
    }
}
