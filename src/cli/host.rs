//! `segany`: segment an image through the bridge and write mask layers

use super::config::CliConfigBuilder;
use crate::host::{layers, BridgeRunner, HostJob, SegmentSettings, TempArtifacts};
use crate::tracing_config::{TracingConfig, TracingFormat};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Segment Anything host: run the bridge and export mask layers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "segany")]
#[allow(clippy::struct_excessive_bools)]
pub struct HostCli {
    /// Input image
    #[arg(value_name = "IMAGE", required_unless_present = "self_test")]
    pub image: Option<PathBuf>,

    /// Output directory for mask layers and the composite preview
    #[arg(short, long, default_value = "segany_out")]
    pub output: PathBuf,

    /// Grayscale selection image (non-zero pixels are selected)
    #[arg(long, value_name = "PATH")]
    pub selection: Option<PathBuf>,

    /// Rectangular selection
    #[arg(long, value_name = "X1,Y1,X2,Y2")]
    pub rect: Option<String>,

    /// Settings file [default: next to the executable]
    #[arg(long, value_name = "PATH")]
    pub settings: Option<PathBuf>,

    /// Bridge executable
    #[arg(long, value_name = "PATH")]
    pub bridge: Option<String>,

    /// Model checkpoint
    #[arg(short, long, value_name = "PATH")]
    pub checkpoint: Option<PathBuf>,

    /// Model type, or "auto" to derive it from the checkpoint name
    #[arg(short, long)]
    pub model_type: Option<String>,

    #[arg(long, value_enum)]
    pub mode: Option<CliMode>,

    #[arg(long, value_enum)]
    pub mask_type: Option<CliCardinality>,

    /// Automatic-mode point density (Low, Medium, High)
    #[arg(long)]
    pub resolution: Option<String>,

    /// Automatic-mode crop layers
    #[arg(long)]
    pub crop_layers: Option<u32>,

    /// Automatic-mode minimum region area in pixels
    #[arg(long)]
    pub min_mask_area: Option<u32>,

    /// Number of selection points to sample
    #[arg(long)]
    pub points: Option<usize>,

    /// Mask colour
    #[arg(long, value_name = "R,G,B[,A]")]
    pub color: Option<String>,

    /// Distinct random colour per mask
    #[arg(long)]
    pub random_color: bool,

    /// Only check that the model loads
    #[arg(long)]
    pub self_test: bool,

    /// Run the bridge with its mock runtime
    #[arg(long)]
    pub mock: bool,

    /// Do not write the merged settings back
    #[arg(long)]
    pub no_save_settings: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliMode {
    Auto,
    Box,
    Selection,
    BoxSelection,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliCardinality {
    Single,
    Multiple,
}

fn runner_for(cli: &HostCli, settings: &SegmentSettings) -> BridgeRunner {
    let mut runner = BridgeRunner::locate(settings.bridge_path.as_deref());
    if cli.mock {
        runner = runner.with_leading_arg("--runtime").with_leading_arg("mock");
    }
    for _ in 0..cli.verbose {
        runner = runner.with_leading_arg("-v");
    }
    runner
}

fn spinner(message: &'static str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .context("Invalid progress template")?,
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    Ok(pb)
}

pub fn main() -> Result<()> {
    let cli = HostCli::parse();

    TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(TracingFormat::Console)
        .with_session_id(uuid::Uuid::new_v4().to_string())
        .init()
        .context("Failed to initialize tracing subscriber")?;

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;

    let settings_path = cli.settings.clone().unwrap_or_else(SegmentSettings::default_path);
    let settings = CliConfigBuilder::apply(&cli, SegmentSettings::load(&settings_path))
        .context("Failed to build configuration")?;

    let job = HostJob::new(
        settings.clone(),
        TempArtifacts::in_system_temp(),
        runner_for(&cli, &settings),
    );

    let outcome = if cli.self_test {
        run_self_test(&job)
    } else {
        run_segmentation(&cli, &job)
    };

    if !cli.no_save_settings {
        if let Err(e) = settings.persist(&settings_path) {
            warn!(error = %e, path = %settings_path.display(), "Failed to save settings");
        }
    }
    outcome
}

fn run_self_test(job: &HostJob) -> Result<()> {
    let pb = spinner("Loading model...")?;
    let result = job.self_test();
    pb.finish_and_clear();

    let output = result.context("Model self-test failed")?;
    println!("{}", output.status_line().unwrap_or("(no status)"));
    Ok(())
}

fn run_segmentation(cli: &HostCli, job: &HostJob) -> Result<()> {
    let image_path = cli
        .image
        .as_ref()
        .context("An input image is required")?;
    let image = image::open(image_path)
        .with_context(|| format!("Failed to open image '{}'", image_path.display()))?;
    let selection = CliConfigBuilder::selection(cli, &image)?;

    info!(
        image = %image_path.display(),
        mode = %job.settings().seg_type,
        mask_type = %job.settings().mask_type,
        "Starting segmentation"
    );

    let start = Instant::now();
    let pb = spinner("Segmenting...")?;
    let mut rng = rand::thread_rng();
    let result = job.run(&image, selection.as_ref(), &mut rng);
    pb.finish_and_clear();
    let run = result.context("Segmentation failed")?;

    let written = layers::write_layers(&cli.output, &image, &run.layers)
        .with_context(|| format!("Failed to write layers to '{}'", cli.output.display()))?;

    println!(
        "{}: {} mask layer(s) in {:.2}s",
        layers::group_name(job.settings().seg_type),
        run.layers.len(),
        start.elapsed().as_secs_f64()
    );
    for (layer, path) in run.layers.iter().zip(&written) {
        println!("  {} -> {}", layer.name, path.display());
    }
    if let Some(composite) = written.last() {
        println!("  composite -> {}", composite.display());
    }
    Ok(())
}
