use std::path::PathBuf;
use std::process;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use raindrop_synth::{
    default_label_path, default_output_path, DropConfig, DropGenerator, FileJob, ProcessResult,
    ShapeKind,
};

#[derive(Parser)]
#[command(
    name = "raindrop",
    about = "Add synthetic raindrop occlusions to an image",
    version,
    after_help = "Simple usage: raindrop <image>  (writes {name}_rain.{ext} next to the input)"
)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Input image file
    input: PathBuf,

    /// Output file (default: {name}_rain.{ext}, or {name}_rain_{n}.{ext} with --variants)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Label image whose bright regions become droplets
    #[arg(long)]
    label_in: Option<PathBuf>,

    /// Write the droplet label mask here (default with --label: {output}_label.png)
    #[arg(long)]
    label_out: Option<PathBuf>,

    /// Write a droplet label mask next to each output
    #[arg(short, long)]
    label: bool,

    /// JSON configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start from the pose-estimation preset
    #[arg(long, conflicts_with = "config")]
    pose: bool,

    /// Smallest droplet radius in pixels
    #[arg(long)]
    min_radius: Option<u32>,

    /// Largest droplet radius in pixels
    #[arg(long)]
    max_radius: Option<u32>,

    /// Smallest number of droplets
    #[arg(long)]
    min_drops: Option<u32>,

    /// Largest number of droplets
    #[arg(long)]
    max_drops: Option<u32>,

    /// Rim darkening ratio (0.0-1.0)
    #[arg(long)]
    edge_dark_ratio: Option<f32>,

    /// Threshold for --label-in pixels
    #[arg(long)]
    label_threshold: Option<u8>,

    /// Comma-separated shapes to draw from
    #[arg(long, value_delimiter = ',')]
    shapes: Option<Vec<ShapeKind>>,

    /// Use only the default drop shape
    #[arg(long)]
    no_shape_variety: bool,

    /// Random seed (default: drawn from the OS)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of independent outputs to generate
    #[arg(short = 'n', long, default_value = "1")]
    variants: usize,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn build_config(cli: &Cli) -> raindrop_synth::Result<DropConfig> {
    let mut cfg = match &cli.config {
        Some(path) => DropConfig::from_json_file(path)?,
        None if cli.pose => DropConfig::pose_estimation(),
        None => DropConfig::default(),
    };
    if let Some(v) = cli.min_radius {
        cfg.min_radius = v;
    }
    if let Some(v) = cli.max_radius {
        cfg.max_radius = v;
    }
    if let Some(v) = cli.min_drops {
        cfg.min_drops = v;
    }
    if let Some(v) = cli.max_drops {
        cfg.max_drops = v;
    }
    if let Some(v) = cli.edge_dark_ratio {
        cfg.edge_dark_ratio = v;
    }
    if let Some(v) = cli.label_threshold {
        cfg.label_threshold = v;
    }
    if let Some(shapes) = &cli.shapes {
        cfg.allowed_shapes.clone_from(shapes);
    }
    if cli.no_shape_variety {
        cfg.shape_variety = false;
    }
    Ok(cfg)
}

fn jobs(cli: &Cli) -> Vec<FileJob> {
    let variant_tag = |i: usize| (cli.variants > 1).then_some(i + 1);
    (0..cli.variants)
        .map(|i| {
            let output = match &cli.output {
                Some(o) if cli.variants > 1 => default_output_path(o, variant_tag(i)),
                Some(o) => o.clone(),
                None => default_output_path(&cli.input, variant_tag(i)),
            };
            let label_output = match &cli.label_out {
                Some(l) if cli.variants > 1 => Some(default_output_path(l, variant_tag(i))),
                Some(l) => Some(l.clone()),
                None if cli.label => Some(default_label_path(&output)),
                None => None,
            };
            FileJob {
                input: cli.input.clone(),
                output,
                label_input: cli.label_in.clone(),
                label_output,
            }
        })
        .collect()
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.quiet {
        log::LevelFilter::Error
    } else if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    if cli.variants == 0 {
        log::error!("--variants must be at least 1");
        process::exit(1);
    }

    let generator = match build_config(&cli).and_then(DropGenerator::new) {
        Ok(g) => g,
        Err(e) => {
            log::error!("{e}");
            process::exit(1);
        }
    };

    if !cli.input.exists() {
        log::error!("input path does not exist: {}", cli.input.display());
        process::exit(1);
    }

    let base_seed = cli.seed.unwrap_or_else(rand::random);
    log::debug!("base seed {base_seed}");

    let results: Vec<ProcessResult> = jobs(&cli)
        .par_iter()
        .enumerate()
        .map(|(i, job)| {
            let mut rng = StdRng::seed_from_u64(base_seed.wrapping_add(i as u64));
            let result = generator.process_file(job, &mut rng);
            print_result(&result, job);
            result
        })
        .collect();

    let fail_count = results.iter().filter(|r| !r.success).count();
    if results.len() > 1 {
        log::info!(
            "[Summary] Generated: {}, Failed: {fail_count} (Total: {})",
            results.len() - fail_count,
            results.len()
        );
    }

    if fail_count > 0 {
        process::exit(1);
    }
}

fn print_result(result: &ProcessResult, job: &FileJob) {
    let filename = job.output.file_name().map_or_else(
        || job.output.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    );

    if result.success {
        log::info!("[OK] {filename}: {}", result.message);
        if result.fallbacks > 0 {
            log::warn!(
                "{filename}: {} droplets rendered without refraction",
                result.fallbacks
            );
        }
        if let Some(label) = &job.label_output {
            log::debug!("  -> label {}", label.display());
        }
    } else {
        log::error!("[FAIL] {}: {}", result.path.display(), result.message);
    }
}
