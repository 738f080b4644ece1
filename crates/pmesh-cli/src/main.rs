//! pmesh CLI - host application for the adaptive subdivision engine
//!
//! Wires a loaded cage into [`pmesh_pipeline::MeshUpdatePipeline`]
//! running on the CPU reference [`pmesh_gpu::CpuBackend`], since the
//! core has no windowing surface of its own (SPEC_FULL.md §6.3).

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pmesh_gpu::CpuBackend;
use pmesh_pipeline::{GlobalUniforms, MeshUpdatePipeline, UpdateUniforms};
use tracing_subscriber::EnvFilter;

mod camera;
mod config;

use camera::OrbitCamera;
use config::{parse_cbt_capacity, ProjectConfig};

#[derive(Parser)]
#[command(name = "pmesh")]
#[command(about = "Adaptive subdivision engine host application", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the CPU reference pipeline over a project directory
    App {
        /// Project directory (contains `models/`, `pmesh.toml`, ...)
        project_dir: PathBuf,
        /// Number of frames to run before exiting
        #[arg(long, default_value_t = 600)]
        frames: u32,
    },
    /// Print cage element counts at a subdivision depth
    Inspect {
        /// Path to a `.ccm` cage file
        cage: PathBuf,
        /// Subdivision depth to report counts at
        #[arg(long, default_value_t = 0)]
        depth: u32,
    },
    /// Run N frames of the CPU reference pipeline and report stabilized stats
    Bench {
        /// Path to a `.ccm` cage file
        cage: PathBuf,
        /// Number of frames to run
        #[arg(long, default_value_t = 300)]
        frames: u32,
        /// CBT pool capacity: one of k128/k256/k512/m1
        #[arg(long, default_value = "k128")]
        cbt_capacity: String,
        /// Target on-screen longest-edge length, in pixels
        #[arg(long, default_value_t = 8.0)]
        triangle_size_px: f32,
        /// Subdivision depth ceiling
        #[arg(long, default_value_t = 24)]
        max_depth: u32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::App { project_dir, frames } => run_app(&project_dir, frames),
        Commands::Inspect { cage, depth } => run_inspect(&cage, depth),
        Commands::Bench {
            cage,
            frames,
            cbt_capacity,
            triangle_size_px,
            max_depth,
        } => run_bench(&cage, frames, &cbt_capacity, triangle_size_px, max_depth),
    }
}

fn run_app(project_dir: &PathBuf, frames: u32) -> Result<()> {
    let config = ProjectConfig::load(project_dir)
        .with_context(|| format!("loading pmesh.toml from {}", project_dir.display()))?;
    let cage_path = config.cage_path(project_dir);
    let cage = pmesh_cage::load_cage(&cage_path)
        .with_context(|| format!("loading cage {}", cage_path.display()))?;

    tracing::info!(
        project = %project_dir.display(),
        cage = %cage_path.display(),
        "loaded project"
    );

    let backend = CpuBackend::new();
    let mut pipeline = MeshUpdatePipeline::new(
        &cage,
        backend,
        config.cbt_capacity()?,
        config.leb_cache_depth(),
    )?;

    let screen_size = (1920u32, 1080u32);
    let aspect = screen_size.0 as f64 / screen_size.1 as f64;
    let camera = OrbitCamera::new(4.0, 1.5, aspect);
    let start = Instant::now();

    let mut last = Default::default();
    for _ in 0..frames {
        let t = start.elapsed().as_secs_f64();
        let view_projection = camera.view_projection(t);
        let global = GlobalUniforms {
            view_projection,
            time: t as f32,
            screen_size,
            ..GlobalUniforms::stationary(screen_size)
        };
        let update = UpdateUniforms {
            view_projection,
            triangle_size_px: config.triangle_size_px,
            max_depth: config.max_depth,
        };
        last = pipeline.run_frame(&global, &update, false)?;
    }

    println!(
        "ran {} frames: active={} bisected={} simplified={} oversubscribed={}",
        frames, last.active_count, last.bisected, last.simplified, last.oversubscribed
    );
    Ok(())
}

fn run_inspect(cage_path: &PathBuf, depth: u32) -> Result<()> {
    let cage = pmesh_cage::load_cage(cage_path)
        .with_context(|| format!("loading cage {}", cage_path.display()))?;

    println!("cage: {}", cage_path.display());
    println!("  base vertices:  {}", cage.vertex_count());
    println!("  base halfedges: {}", cage.halfedge_count());
    println!("  base edges:     {}", cage.edge_count());
    println!("  base faces:     {}", cage.face_count());

    let counts = cage.counts_at_depth(depth);
    println!("\nat depth {depth}:");
    println!("  vertices:  {}", counts.vertex);
    println!("  halfedges: {}", counts.halfedge);
    println!("  edges:     {}", counts.edge);
    println!("  creases:   {}", counts.crease);
    println!("  faces:     {}", counts.face);
    Ok(())
}

fn run_bench(
    cage_path: &PathBuf,
    frames: u32,
    cbt_capacity: &str,
    triangle_size_px: f32,
    max_depth: u32,
) -> Result<()> {
    let cage = pmesh_cage::load_cage(cage_path)
        .with_context(|| format!("loading cage {}", cage_path.display()))?;
    let capacity = parse_cbt_capacity(cbt_capacity)?;

    let backend = CpuBackend::new();
    let mut pipeline = MeshUpdatePipeline::new(&cage, backend, capacity, max_depth)?;

    let screen_size = (1920u32, 1080u32);
    let aspect = screen_size.0 as f64 / screen_size.1 as f64;
    let camera = OrbitCamera::new(4.0, 1.5, aspect);

    let wall_clock = Instant::now();
    let mut last = Default::default();
    for frame in 0..frames {
        let t = frame as f64 / 60.0;
        let view_projection = camera.view_projection(t);
        let global = GlobalUniforms {
            view_projection,
            time: t as f32,
            screen_size,
            ..GlobalUniforms::stationary(screen_size)
        };
        let update = UpdateUniforms {
            view_projection,
            triangle_size_px,
            max_depth,
        };
        last = pipeline.run_frame(&global, &update, frame == frames - 1)?;
    }
    let elapsed = wall_clock.elapsed();

    println!("ran {frames} frames in {:.3}s ({:.1} fps)", elapsed.as_secs_f64(), frames as f64 / elapsed.as_secs_f64().max(1e-9));
    println!("stabilized active triangle count: {}", last.active_count);
    println!("stabilized oversubscribed counter: {}", last.oversubscribed);
    println!(
        "dispatch calls: {}, draw calls: {}",
        pipeline.backend().dispatch_count(),
        pipeline.backend().draw_count()
    );
    Ok(())
}
