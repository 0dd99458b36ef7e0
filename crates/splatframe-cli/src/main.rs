use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use splatframe_multiframe::{
    CpuDevice, CpuTexture, Multiframe, MultiframeConfig, PixelFormat, SampleConfig, SampleSet,
};
use splatframe_raster::{Projection, RenderMode, SoftwareRasterizer, SplatCamera, SplatPoint};
use splatframe_render::{GpuContext, HeadlessConfig, HeadlessRenderer};

#[derive(Parser)]
#[command(name = "splatframe")]
#[command(about = "Gaussian splat rendering with multiframe supersampling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the sub-pixel sample set for a grid size
    Samples {
        #[arg(short, long, default_value = "5")]
        grid: u32,
        /// Randomize each sample within its grid cell
        #[arg(long)]
        jitter: bool,
        /// Filter footprint in pixels
        #[arg(long, default_value = "2.0")]
        filter_size: f32,
        /// Gaussian sigma, 0 for a box filter
        #[arg(long, default_value = "0.0")]
        sigma: f32,
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Project a single splat and print its screen-space footprint
    Project {
        /// Center as "x,y,z"
        #[arg(long)]
        center: String,
        /// Per-axis scale as "x,y,z"
        #[arg(long, default_value = "0.1,0.1,0.1")]
        scale: String,
        /// Quaternion xyz as "x,y,z" (w is reconstructed)
        #[arg(long, default_value = "0,0,0")]
        rotation: String,
        #[arg(long, default_value = "512")]
        width: u32,
        #[arg(long, default_value = "512")]
        height: u32,
    },

    /// Render a procedural splat scene to PNG
    Render {
        #[arg(short, long, default_value = "splats.png")]
        output: PathBuf,
        #[arg(long, default_value = "512")]
        width: u32,
        #[arg(long, default_value = "512")]
        height: u32,
        /// Number of splats
        #[arg(short, long, default_value = "500")]
        count: usize,
        /// Overrides the config file's seed when given
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value = "4")]
        grid: u32,
        #[arg(long, default_value = "0.0")]
        sigma: f32,
        /// Multiframe configuration as JSON; overrides --grid and --sigma
        #[arg(long)]
        config: Option<PathBuf>,
        /// Render with wgpu instead of the software rasterizer
        #[arg(long)]
        gpu: bool,
        /// Draw splats as ellipsoids
        #[arg(long)]
        debug: bool,
    },
}

fn parse_vec3(s: &str) -> Result<Vec3> {
    let coords: Vec<f32> = s
        .split(',')
        .map(|c| c.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Invalid vector '{s}'"))?;

    if coords.len() != 3 {
        anyhow::bail!("Vector must be x,y,z");
    }
    Ok(Vec3::new(coords[0], coords[1], coords[2]))
}

fn default_camera(width: u32, height: u32) -> SplatCamera {
    let aspect = width as f32 / height.max(1) as f32;
    SplatCamera::new(
        Mat4::look_at_rh(Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO, Vec3::Y),
        Mat4::perspective_rh(60f32.to_radians(), aspect, 0.1, 100.0),
        Vec2::new(width as f32, height as f32),
    )
}

/// Random splats inside the unit cube
fn procedural_scene(count: usize, seed: u64) -> Vec<SplatPoint> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let center = Vec3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            let scale = Vec3::new(
                rng.gen_range(0.02..0.15),
                rng.gen_range(0.02..0.15),
                rng.gen_range(0.02..0.15),
            );
            let rotation = Quat::from_euler(
                glam::EulerRot::XYZ,
                rng.gen_range(0.0..std::f32::consts::TAU),
                rng.gen_range(0.0..std::f32::consts::TAU),
                rng.gen_range(0.0..std::f32::consts::TAU),
            );
            let color = Vec4::new(rng.gen(), rng.gen(), rng.gen(), rng.gen_range(0.5..1.0));
            SplatPoint::new(center, scale, rotation, color)
        })
        .collect()
}

/// Scene seed when neither --seed nor the config file names one
const DEFAULT_SEED: u64 = 42;

/// Load the config file, or build one from the flags; an explicit seed wins
fn multiframe_config(
    path: Option<&Path>,
    grid: u32,
    sigma: f32,
    seed: Option<u64>,
) -> Result<MultiframeConfig> {
    let config = match path {
        Some(path) => MultiframeConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => MultiframeConfig::new(SampleConfig::new(grid).with_sigma(sigma)),
    };
    Ok(match seed {
        Some(seed) => config.with_seed(seed),
        None => config,
    })
}

fn render_cpu(
    camera: &SplatCamera,
    points: &[SplatPoint],
    mode: RenderMode,
    config: MultiframeConfig,
) -> Result<Vec<u8>> {
    let (width, height) = (camera.viewport.x as u32, camera.viewport.y as u32);
    let rasterizer = SoftwareRasterizer::new(mode);
    let mut device = CpuDevice::default();
    let mut multiframe = Multiframe::new(&device, config)?;

    for _ in 0..multiframe.sample_count() {
        let sub_frame = multiframe.sub_frame(camera.projection);
        let image = rasterizer.render(&camera.with_projection(sub_frame.projection), points)?;
        let source =
            CpuTexture::from_pixels(width, height, PixelFormat::Rgba8Unorm, image.into_pixels())?;
        if !multiframe.update(&mut device, &source)? {
            break;
        }
    }

    let display = device.display().context("Nothing was presented")?;
    Ok(display.to_rgba8())
}

fn render_gpu(
    camera: &SplatCamera,
    points: Vec<SplatPoint>,
    mode: RenderMode,
    config: MultiframeConfig,
) -> Result<Vec<u8>> {
    let context = GpuContext::new_blocking()?;
    let headless = HeadlessConfig {
        width: camera.viewport.x as u32,
        height: camera.viewport.y as u32,
        mode,
        multiframe: config,
        ..Default::default()
    };
    let mut renderer = HeadlessRenderer::new(context, headless, points)?;
    let frame = renderer.render_converged(camera)?;
    Ok(frame.to_rgba8())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Samples {
            grid,
            jitter,
            filter_size,
            sigma,
            seed,
            json,
        } => {
            let config = SampleConfig::new(grid)
                .with_jitter(jitter)
                .with_filter_size(filter_size)
                .with_sigma(sigma);
            let set = SampleSet::generate(config, &mut StdRng::seed_from_u64(seed))?;

            if json {
                println!("{}", serde_json::to_string_pretty(set.samples())?);
            } else {
                println!("{} samples, texture bias {:.2}", set.len(), set.texture_bias());
                println!("{:>4}  {:>9}  {:>9}  {:>9}", "#", "x", "y", "weight");
                for (i, sample) in set.iter().enumerate() {
                    println!(
                        "{:>4}  {:>9.4}  {:>9.4}  {:>9.5}",
                        i, sample.offset.x, sample.offset.y, sample.weight
                    );
                }
            }
        }

        Commands::Project {
            center,
            scale,
            rotation,
            width,
            height,
        } => {
            let point = SplatPoint::from_rotation_xyz(
                parse_vec3(&center)?,
                parse_vec3(&scale)?,
                parse_vec3(&rotation)?,
                Vec4::ONE,
            )?;
            let camera = default_camera(width, height);
            camera.validate()?;

            match camera.project(&point) {
                Projection::Culled => println!("Culled: behind the camera"),
                Projection::Visible(splat) => {
                    println!("{}", serde_json::to_string_pretty(&splat)?);
                }
            }
        }

        Commands::Render {
            output,
            width,
            height,
            count,
            seed,
            grid,
            sigma,
            config,
            gpu,
            debug,
        } => {
            let multiframe = multiframe_config(config.as_deref(), grid, sigma, seed)?;
            let mode = if debug {
                RenderMode::Debug
            } else {
                RenderMode::Splat
            };

            let camera = default_camera(width, height);
            camera.validate()?;
            let points = procedural_scene(count, multiframe.seed.unwrap_or(DEFAULT_SEED));

            tracing::info!(
                "Rendering {} splats at {}x{} ({})",
                points.len(),
                width,
                height,
                if gpu { "wgpu" } else { "software" }
            );

            let rgba = if gpu {
                render_gpu(&camera, points, mode, multiframe)?
            } else {
                render_cpu(&camera, &points, mode, multiframe)?
            };

            image::RgbaImage::from_raw(width, height, rgba)
                .context("Image buffer size mismatch")?
                .save(&output)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Wrote {}", output.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vec3() {
        assert_eq!(parse_vec3("1, 2.5,-3").unwrap(), Vec3::new(1.0, 2.5, -3.0));
        assert!(parse_vec3("1,2").is_err());
        assert!(parse_vec3("a,b,c").is_err());
    }

    #[test]
    fn test_procedural_scene_is_seeded() {
        let a = procedural_scene(16, 3);
        assert_eq!(a, procedural_scene(16, 3));
        assert_ne!(a, procedural_scene(16, 4));
        assert!(a.iter().all(|p| p.center.abs().max_element() <= 1.0));
    }

    #[test]
    fn test_config_file_seed_survives_without_flag() {
        let path =
            std::env::temp_dir().join(format!("splatframe-seed-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "seed": 9 }"#).unwrap();

        let loaded = multiframe_config(Some(&path), 4, 0.0, None).unwrap();
        assert_eq!(loaded.seed, Some(9));
        let overridden = multiframe_config(Some(&path), 4, 0.0, Some(3)).unwrap();
        assert_eq!(overridden.seed, Some(3));
        std::fs::remove_file(&path).unwrap();

        let flags = multiframe_config(None, 3, 0.5, None).unwrap();
        assert_eq!(flags.seed, None);
        assert_eq!(flags.samples.grid_size, 3);
        assert_eq!(multiframe_config(None, 3, 0.5, Some(11)).unwrap().seed, Some(11));
    }

    #[test]
    fn test_cpu_render_produces_image() {
        let camera = default_camera(24, 16);
        let points = procedural_scene(20, 1);
        let config = MultiframeConfig::new(SampleConfig::new(2)).with_seed(5);
        let rgba = render_cpu(&camera, &points, RenderMode::Splat, config).unwrap();
        assert_eq!(rgba.len(), 24 * 16 * 4);
    }
}
