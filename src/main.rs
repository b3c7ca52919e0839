use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clahe_vision::{ClaheConfig, ClahePipeline};

#[derive(Parser)]
#[command(name = "clahe")]
#[command(about = "Contrast-limited adaptive histogram equalization for grayscale images")]
struct Cli {
    /// Input image (PNG, JPEG, ...); color images are converted to grayscale
    #[arg(short, long)]
    input: PathBuf,

    /// Output PNG file path
    #[arg(short, long)]
    output: PathBuf,

    /// Number of tiles along the x axis
    #[arg(long, default_value_t = 64)]
    tiles_x: u32,

    /// Number of tiles along the y axis
    #[arg(long, default_value_t = 64)]
    tiles_y: u32,

    /// Relative clip limit
    #[arg(short, long, default_value_t = 16.0)]
    limit: f32,

    /// Histogram bins per tile (at least 128 are used)
    #[arg(long, default_value_t = 128)]
    bins: usize,

    /// Maximum number of worker threads (defaults to the number of CPUs)
    #[arg(short, long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clahe_vision=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let picture = clahe_vision::load(&cli.input)
        .with_context(|| format!("Failed to load {}", cli.input.display()))?;

    let pipeline = ClahePipeline::new(ClaheConfig {
        tiles_x: cli.tiles_x,
        tiles_y: cli.tiles_y,
        clip_limit: cli.limit,
        bin_count: cli.bins,
        workers: cli.workers,
    });

    let started = Instant::now();
    let equalized = pipeline
        .equalize(picture)
        .await
        .context("Equalization failed")?;
    println!("{:?}", started.elapsed());

    clahe_vision::save(&equalized, &cli.output)
        .with_context(|| format!("Failed to write {}", cli.output.display()))?;

    Ok(())
}
